use std::time::Duration;

use anyhow::Context;
use roster_storage::UpstreamError;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("roster-sync/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

pub fn build_client(config: &HttpConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    builder.build().context("building reqwest client")
}

/// Sends a prepared request and decodes the JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, UpstreamError> {
    let resp = UpstreamError::check_response(request.send().await?)?;
    let url = resp.url().to_string();
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| UpstreamError::Parse(format!("{url}: {err}")))
}

pub(crate) async fn send_text(request: reqwest::RequestBuilder) -> Result<String, UpstreamError> {
    let resp = UpstreamError::check_response(request.send().await?)?;
    Ok(resp.text().await?)
}

/// Decodes the handful of entities that show up in rendered titles:
/// named ones, decimal `&#8217;` and hex `&#x2019;`.
pub fn decode_html_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "rsquo" => '\u{2019}',
        "lsquo" => '\u{2018}',
        "ndash" => '\u{2013}',
        "hellip" => '\u{2026}',
        _ => return None,
    };
    Some(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_titles_are_decoded() {
        assert_eq!(decode_html_entities("Simon &amp; Garfunkel"), "Simon & Garfunkel");
        assert_eq!(decode_html_entities("Guns N&#8217; Roses"), "Guns N\u{2019} Roses");
        assert_eq!(decode_html_entities("L&#x27;Impératrice"), "L'Impératrice");
    }

    #[test]
    fn stray_ampersands_survive() {
        assert_eq!(decode_html_entities("Gaz & Co"), "Gaz & Co");
        assert_eq!(decode_html_entities("a &bogus; b"), "a &bogus; b");
        assert_eq!(decode_html_entities("trailing &"), "trailing &");
    }

    #[test]
    fn client_builds_with_defaults() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }
}

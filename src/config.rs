//! `AppConfig`: the CLI-facing configuration surface (§4.H), parsed with
//! `clap`'s derive API, every flag with an environment-variable fallback.
use clap::Parser;
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct AppConfig {
    /// Base server URL, e.g. http://localhost:8080. Upgraded to ws/wss and
    /// given the document's socket path by the connection manager.
    #[arg(long, env = "PADSYNC_SERVER_URL")]
    pub server_url: Url,

    /// Identifier of the document to join.
    #[arg(long, env = "PADSYNC_DOCUMENT_ID")]
    pub document_id: String,

    /// Milliseconds between reconnect attempts.
    #[arg(long, env = "PADSYNC_RECONNECT_INTERVAL_MS", default_value_t = 1000)]
    pub reconnect_interval_ms: u64,

    /// Display name announced to peers.
    #[arg(long, env = "PADSYNC_NAME", default_value = "anonymous")]
    pub name: String,

    /// Cursor/selection color hue, 0..=359. Derived from `name` if unset.
    #[arg(long, env = "PADSYNC_HUE")]
    pub hue: Option<u16>,
}

impl AppConfig {
    /// The effective hue: the configured value, or one derived from a hash
    /// of `name` so the same name always gets the same color.
    pub fn hue(&self) -> u16 {
        self.hue.unwrap_or_else(|| hash_hue(&self.name))
    }

    /// The WebSocket URL the connection manager dials: `http`/`https`
    /// upgraded to `ws`/`wss`, with the document socket path appended
    /// (§6).
    pub fn socket_url(&self) -> Url {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        let _ = url.set_scheme(scheme);
        url.set_path(&format!("api/socket/{}", self.document_id));
        url
    }
}

fn hash_hue(name: &str) -> u16 {
    let mut hash: u32 = 5381;
    for byte in name.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    (hash % 360) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(server_url: &str, document_id: &str) -> AppConfig {
        AppConfig {
            server_url: Url::parse(server_url).unwrap(),
            document_id: document_id.to_string(),
            reconnect_interval_ms: 1000,
            name: "anonymous".to_string(),
            hue: None,
        }
    }

    #[test]
    fn socket_url_upgrades_scheme_and_appends_path() {
        let cfg = config("http://example.com", "doc1");
        assert_eq!(cfg.socket_url().as_str(), "ws://example.com/api/socket/doc1");

        let cfg = config("https://example.com", "doc1");
        assert_eq!(cfg.socket_url().as_str(), "wss://example.com/api/socket/doc1");
    }

    #[test]
    fn hue_is_deterministic_when_unset() {
        let cfg = config("http://example.com", "doc1");
        assert_eq!(cfg.hue(), cfg.hue());
    }

    #[test]
    fn hue_uses_explicit_value_when_set() {
        let mut cfg = config("http://example.com", "doc1");
        cfg.hue = Some(42);
        assert_eq!(cfg.hue(), 42);
    }

    #[test]
    fn parses_from_args() {
        let cfg = AppConfig::parse_from([
            "padsync-cli",
            "--server-url",
            "http://localhost:8080",
            "--document-id",
            "abc",
        ]);
        assert_eq!(cfg.document_id, "abc");
        assert_eq!(cfg.reconnect_interval_ms, 1000);
    }
}

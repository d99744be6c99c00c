//! Connection string parsing.
//!
//! `<scheme>://<key>:<secret>@<host>[:<port>]/<bucket>/<prefix>` with
//! `scheme` one of `s3`, `http`, `https`. `objectdb://fake@local/<bucket>/<prefix>`
//! (or any connection string combined with `use_fake: true`) swaps in the
//! in-memory backend instead of touching a real store.

use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    S3,
    Http,
    Https,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub scheme: Scheme,
    pub access_key: String,
    pub secret_key: String,
    pub host: String,
    pub port: Option<u16>,
    pub bucket: String,
    pub prefix: String,
}

impl ConnectionInfo {
    /// The endpoint URL to hand to the S3 SDK, or `None` for the default AWS
    /// endpoint (plain `s3://` against a host of `aws`).
    pub fn endpoint_url(&self) -> Option<String> {
        if self.scheme == Scheme::S3 && self.host == "aws" {
            return None;
        }
        let scheme = match self.scheme {
            Scheme::S3 | Scheme::Https => "https",
            Scheme::Http => "http",
        };
        match self.port {
            Some(port) => Some(format!("{scheme}://{}:{port}", self.host)),
            None => Some(format!("{scheme}://{}", self.host)),
        }
    }
}

pub fn parse(connection_string: &str) -> ObjectDbResult<ConnectionInfo> {
    let bad = |message: &str| {
        ObjectDbError::StoreRejected {
            message: format!("invalid connection string: {message}"),
            context: ErrorContext::new(),
        }
    };

    let (scheme_str, rest) = connection_string.split_once("://").ok_or_else(|| bad("missing scheme"))?;
    let scheme = match scheme_str {
        "s3" => Scheme::S3,
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        other => return Err(bad(&format!("unsupported scheme '{other}'"))),
    };

    let (creds, rest) = rest.split_once('@').ok_or_else(|| bad("missing '@' before host"))?;
    let (access_key, secret_key) = creds.split_once(':').ok_or_else(|| bad("missing ':' between key and secret"))?;

    let mut path_parts = rest.splitn(2, '/');
    let host_port = path_parts.next().ok_or_else(|| bad("missing host"))?;
    let path = path_parts.next().unwrap_or("");

    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => {
            let port: u16 = p.parse().map_err(|_| bad("non-numeric port"))?;
            (h.to_string(), Some(port))
        }
        None => (host_port.to_string(), None),
    };

    let mut path_segments = path.splitn(2, '/');
    let bucket = path_segments.next().filter(|s| !s.is_empty()).ok_or_else(|| bad("missing bucket"))?;
    let prefix = path_segments.next().unwrap_or("").trim_end_matches('/');

    Ok(ConnectionInfo {
        scheme,
        access_key: access_key.to_string(),
        secret_key: secret_key.to_string(),
        host,
        port,
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_connection_string() {
        let info = parse("s3://AKIA123:secretvalue@minio.internal:9000/mydb/root").unwrap();
        assert_eq!(info.scheme, Scheme::S3);
        assert_eq!(info.access_key, "AKIA123");
        assert_eq!(info.secret_key, "secretvalue");
        assert_eq!(info.host, "minio.internal");
        assert_eq!(info.port, Some(9000));
        assert_eq!(info.bucket, "mydb");
        assert_eq!(info.prefix, "root");
    }

    #[test]
    fn prefix_is_optional() {
        let info = parse("https://k:s@example.com/bucket").unwrap();
        assert_eq!(info.prefix, "");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse("ftp://k:s@host/bucket").is_err());
    }

    #[test]
    fn rejects_missing_bucket() {
        assert!(parse("s3://k:s@host/").is_err());
    }
}

//! SSH identification banner capture.
//!
//! An SSH server sends its identification line (`SSH-2.0-Cisco-1.25`) right
//! after the TCP handshake. The software string is a cheap vendor hint for
//! picking a command profile before any session is opened.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Maximum bytes to read for a banner.
const MAX_BANNER_SIZE: usize = 512;

/// Read the first line a server sends, if it arrives within `wait`.
pub async fn read_banner<S>(stream: &mut S, wait: Duration) -> Option<String>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; MAX_BANNER_SIZE];
    match timeout(wait, stream.read(&mut buffer)).await {
        Ok(Ok(n)) if n > 0 => {
            let line = buffer[..n]
                .split(|&b| b == b'\n')
                .next()
                .unwrap_or(&buffer[..n]);
            let banner = sanitize_banner(line);
            (!banner.is_empty()).then_some(banner)
        }
        _ => None,
    }
}

/// Software part of an SSH identification line (`Cisco-1.25`).
pub fn ssh_software(banner: &str) -> Option<&str> {
    let rest = banner.strip_prefix("SSH-")?;
    let (_proto, software) = rest.split_once('-')?;
    Some(software.split_whitespace().next().unwrap_or(software))
}

/// Sanitize banner by removing non-printable characters and limiting length.
fn sanitize_banner(data: &[u8]) -> String {
    let s: String = data
        .iter()
        .take(256)
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else if b == b'\r' || b == b'\t' {
                ' '
            } else {
                '.'
            }
        })
        .collect();

    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_banner() {
        assert_eq!(sanitize_banner(b"SSH-2.0-OpenSSH_8.9\r"), "SSH-2.0-OpenSSH_8.9");
        assert_eq!(sanitize_banner(b"\x00\x01Hello\x02World"), "..Hello.World");
    }

    #[test]
    fn test_ssh_software() {
        assert_eq!(ssh_software("SSH-2.0-Cisco-1.25"), Some("Cisco-1.25"));
        assert_eq!(ssh_software("SSH-2.0-ROSSSH"), Some("ROSSSH"));
        assert_eq!(ssh_software("220 ftp ready"), None);
    }

    #[tokio::test]
    async fn test_read_banner_first_line_only() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"SSH-2.0-HUAWEI-1.5\r\nextra")
            .build();
        let banner = read_banner(&mut mock, Duration::from_secs(1)).await;
        assert_eq!(banner.as_deref(), Some("SSH-2.0-HUAWEI-1.5"));
    }
}

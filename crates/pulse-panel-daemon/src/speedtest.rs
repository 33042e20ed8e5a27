//! Blocking HTTP bandwidth probe.
//!
//! Times one plain-HTTP download and one upload against configured URLs.
//! Runs on the coordinator's worker thread, never on the tokio runtime.

use anyhow::{Context, Result};
use pulse_panel_core::{Error, Probe, SpeedTestResult};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::SpeedTestConfig;

const CHUNK: usize = 64 * 1024;

/// Host, port and path of a plain `http://` URL.
#[derive(Debug, Clone, PartialEq)]
struct HttpTarget {
    host: String,
    port: u16,
    path: String,
}

impl HttpTarget {
    fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("http://")
            .with_context(|| format!("Only http:// URLs are supported: {}", url))?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        // IPv6 literals are bracketed: http://[::1]:8080/
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, after) = bracketed
                    .split_once(']')
                    .with_context(|| format!("Unclosed IPv6 literal in URL: {}", url))?;
                match after.strip_prefix(':') {
                    Some(port) => (host, port),
                    None if after.is_empty() => (host, ""),
                    None => anyhow::bail!("Invalid port in URL: {}", url),
                }
            }
            None => authority.rsplit_once(':').unwrap_or((authority, "")),
        };
        let port = if port.is_empty() {
            80
        } else {
            port.parse()
                .with_context(|| format!("Invalid port in URL: {}", url))?
        };
        if host.is_empty() {
            anyhow::bail!("Missing host in URL: {}", url);
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// Speed test that downloads and uploads over plain HTTP.
pub struct HttpProbe {
    download: HttpTarget,
    upload: HttpTarget,
    upload_bytes: usize,
    timeout: Duration,
}

impl HttpProbe {
    /// Creates a probe from the speed test configuration.
    pub fn new(config: &SpeedTestConfig) -> Result<Self> {
        Ok(Self {
            download: HttpTarget::parse(&config.download_url).context("Invalid download_url")?,
            upload: HttpTarget::parse(&config.upload_url).context("Invalid upload_url")?,
            upload_bytes: config.upload_bytes.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    fn connect(&self, target: &HttpTarget) -> std::io::Result<TcpStream> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "host did not resolve")
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    /// Returns the download rate in Mbps.
    fn measure_download(&self) -> std::result::Result<f64, String> {
        let target = &self.download;
        let mut stream = self.connect(target).map_err(|e| e.to_string())?;
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: pulse-panel/{}\r\nConnection: close\r\n\r\n",
            target.path,
            target.host_header(),
            env!("CARGO_PKG_VERSION")
        );
        let started = Instant::now();
        stream
            .write_all(request.as_bytes())
            .map_err(|e| e.to_string())?;

        let mut reader = BufReader::new(stream);
        read_response_head(&mut reader)?;

        let mut buf = vec![0u8; CHUNK];
        let mut total = 0usize;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.to_string()),
            }
        }
        debug!("Downloaded {} bytes in {:?}", total, started.elapsed());
        rate_mbps(total, started.elapsed())
    }

    /// Returns the upload rate in Mbps.
    fn measure_upload(&self) -> std::result::Result<f64, String> {
        let target = &self.upload;
        let mut stream = self.connect(target).map_err(|e| e.to_string())?;
        let head = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: pulse-panel/{}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            target.path,
            target.host_header(),
            env!("CARGO_PKG_VERSION"),
            self.upload_bytes
        );
        let started = Instant::now();
        stream.write_all(head.as_bytes()).map_err(|e| e.to_string())?;

        let chunk = vec![0u8; CHUNK];
        let mut remaining = self.upload_bytes;
        while remaining > 0 {
            let n = remaining.min(CHUNK);
            stream.write_all(&chunk[..n]).map_err(|e| e.to_string())?;
            remaining -= n;
        }
        stream.flush().map_err(|e| e.to_string())?;

        // The server answering means it has consumed the body.
        let mut reader = BufReader::new(stream);
        read_response_head(&mut reader)?;
        debug!("Uploaded {} bytes in {:?}", self.upload_bytes, started.elapsed());
        rate_mbps(self.upload_bytes, started.elapsed())
    }
}

/// Reads the status line and headers, failing on non-2xx statuses.
fn read_response_head<R: BufRead>(reader: &mut R) -> std::result::Result<(), String> {
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .map_err(|e| e.to_string())?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| format!("malformed status line: {:?}", status_line.trim()))?;
    if !(200..300).contains(&status) {
        return Err(format!("server answered {}", status_line.trim()));
    }

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| e.to_string())?;
        if n == 0 || line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

fn rate_mbps(bytes: usize, elapsed: Duration) -> std::result::Result<f64, String> {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 {
        return Err("no data transferred".to_string());
    }
    if secs <= 0.0 {
        return Err("transfer took no measurable time".to_string());
    }
    Ok(bytes as f64 * 8.0 / secs / 1_000_000.0)
}

impl Probe for HttpProbe {
    fn measure(&self) -> pulse_panel_core::Result<SpeedTestResult> {
        let download = self
            .measure_download()
            .map_err(|e| Error::ProbeFailed(format!("download: {}", e)))?;
        let upload = self
            .measure_upload()
            .map_err(|e| Error::ProbeFailed(format!("upload: {}", e)))?;
        Ok(SpeedTestResult::new(download, upload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn serve_once<F>(handler: F) -> u16
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                handler(stream);
            }
        });
        port
    }

    fn read_head(reader: &mut BufReader<TcpStream>) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                return lines;
            }
            lines.push(line.trim_end().to_string());
        }
    }

    fn download_server(body_len: usize) -> u16 {
        serve_once(move |stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let head = read_head(&mut reader);
            assert!(head[0].starts_with("GET /blob HTTP/1.1"));
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body_len
            )
            .unwrap();
            stream.write_all(&vec![7u8; body_len]).unwrap();
        })
    }

    fn upload_server(status: &'static str) -> u16 {
        serve_once(move |stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let head = read_head(&mut reader);
            let length: usize = head
                .iter()
                .find_map(|h| h.strip_prefix("Content-Length: "))
                .unwrap()
                .parse()
                .unwrap();
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            write!(stream, "HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status).unwrap();
        })
    }

    fn probe(download_port: u16, upload_port: u16) -> HttpProbe {
        HttpProbe::new(&SpeedTestConfig {
            download_url: format!("http://127.0.0.1:{}/blob", download_port),
            upload_url: format!("http://127.0.0.1:{}/sink", upload_port),
            upload_bytes: 256 * 1024,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_target() {
        let target = HttpTarget::parse("http://example.com:8080/files/10MB.bin").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 8080);
        assert_eq!(target.path, "/files/10MB.bin");
        assert_eq!(target.host_header(), "example.com:8080");

        let bare = HttpTarget::parse("http://example.com").unwrap();
        assert_eq!(bare.port, 80);
        assert_eq!(bare.path, "/");
        assert_eq!(bare.host_header(), "example.com");
    }

    #[test]
    fn test_parse_ipv6_literal() {
        let target = HttpTarget::parse("http://[::1]:8080/blob").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.path, "/blob");
        assert_eq!(target.host_header(), "[::1]:8080");
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .unwrap()
            .next()
            .unwrap();
        assert!(addr.is_ipv6());

        let bare = HttpTarget::parse("http://[fe80::1]/blob").unwrap();
        assert_eq!(bare.host, "fe80::1");
        assert_eq!(bare.port, 80);
        assert_eq!(bare.host_header(), "[fe80::1]");

        assert!(HttpTarget::parse("http://[::1/blob").is_err());
        assert!(HttpTarget::parse("http://[::1]8080/blob").is_err());
        assert!(HttpTarget::parse("http://[]:8080/").is_err());
    }

    #[test]
    fn test_parse_rejects_https_and_bad_port() {
        assert!(HttpTarget::parse("https://example.com/").is_err());
        assert!(HttpTarget::parse("http://example.com:http/").is_err());
        assert!(HttpTarget::parse("http:///path").is_err());
    }

    #[test]
    fn test_measures_against_local_server() {
        let probe = probe(download_server(512 * 1024), upload_server("200 OK"));
        let result = probe.measure().unwrap();
        assert!(result.download_mbps > 0.0);
        assert!(result.upload_mbps > 0.0);
    }

    #[test]
    fn test_server_error_fails_probe() {
        let probe = probe(download_server(1024), upload_server("503 Service Unavailable"));
        match probe.measure() {
            Err(Error::ProbeFailed(reason)) => {
                assert!(reason.starts_with("upload: server answered"), "{}", reason)
            }
            other => panic!("expected probe failure, got {:?}", other),
        }
    }

    #[test]
    fn test_unreachable_host_fails_probe() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let probe = probe(port, port);
        assert!(matches!(probe.measure(), Err(Error::ProbeFailed(r)) if r.starts_with("download:")));
    }

    #[test]
    fn test_rate_mbps() {
        assert_eq!(rate_mbps(1_000_000, Duration::from_secs(8)).unwrap(), 1.0);
        assert!(rate_mbps(0, Duration::from_secs(1)).is_err());
        assert!(rate_mbps(10, Duration::ZERO).is_err());
    }
}

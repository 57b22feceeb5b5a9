use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Transport boundary for a single camera feed.
///
/// Implementations own their connection state; the capture loop drives
/// connect / read_frame / disconnect and handles retry policy itself.
#[async_trait]
pub trait FrameSource: Send + std::fmt::Debug {
    async fn connect(&mut self) -> Result<(), CameraError>;
    async fn read_frame(&mut self) -> Result<FrameData, CameraError>;
    async fn disconnect(&mut self);
}

/// Build the right source for a camera's URI scheme.
///
/// `sim://` feeds are generated in-process, `http://` is treated as an
/// MJPEG multipart stream. `rtsp://` is recognized but unsupported and is
/// reported through the normal camera error path.
pub fn create_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    let uri = config.source_uri.as_str();
    let scheme = uri
        .split_once("://")
        .map(|(s, _)| s)
        .ok_or_else(|| CameraError::InvalidUri {
            uri: config.sanitized_uri(),
            details: "missing scheme".to_string(),
        })?;

    match scheme {
        "sim" => Ok(Box::new(SyntheticSource::from_config(config))),
        "http" => Ok(Box::new(MjpegHttpSource::from_config(config)?)),
        other => Err(CameraError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

/// In-process frame generator for development and tests.
///
/// `sim://fire` (or any URI whose host contains "fire") paints a block of
/// flame-colored pixels so the reference detector trips; everything else
/// produces a slowly shifting gradient.
#[derive(Debug)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fire: bool,
    connected: bool,
    frame_counter: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fire: bool) -> Self {
        Self {
            width,
            height,
            fire,
            connected: false,
            frame_counter: 0,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        let host = config
            .source_uri
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or("");
        Self::new(
            config.resolution.0,
            config.resolution.1,
            host.contains("fire"),
        )
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let phase = (self.frame_counter % 256) as u8;
        let mut data = vec![0u8; w * h * 3];

        // Blue channel stays high so the gradient never lands in the
        // flame color band
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                data[i] = ((x * 255 / w) as u8).wrapping_add(phase);
                data[i + 1] = (y * 255 / h) as u8;
                data[i + 2] = 160;
            }
        }

        if self.fire {
            // Flame-colored block over the lower-right quadrant
            for y in h / 2..h {
                for x in w / 2..w {
                    let i = (y * w + x) * 3;
                    data[i] = 255;
                    data[i + 1] = 120;
                    data[i + 2] = 10;
                }
            }
        }

        data
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn connect(&mut self) -> Result<(), CameraError> {
        self.connected = true;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        if !self.connected {
            return Err(CameraError::Read {
                details: "source not connected".to_string(),
            });
        }
        self.frame_counter += 1;
        Ok(FrameData::new(
            self.frame_counter,
            SystemTime::now(),
            self.render(),
            self.width,
            self.height,
            FrameFormat::Rgb24,
        ))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// MJPEG-over-HTTP network source.
///
/// Speaks just enough HTTP to consume a `multipart/x-mixed-replace` stream:
/// one GET, then repeated part headers + JPEG payloads. The JPEG bytes are
/// passed through opaque; no decoding happens here.
#[derive(Debug)]
pub struct MjpegHttpSource {
    host: String,
    port: u16,
    path: String,
    display_uri: String,
    connect_timeout: Duration,
    reader: Option<BufReader<TcpStream>>,
    frame_counter: u64,
}

impl MjpegHttpSource {
    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        let uri = config.connect_uri();
        let rest = uri
            .split_once("://")
            .map(|(_, rest)| rest)
            .ok_or_else(|| CameraError::InvalidUri {
                uri: config.sanitized_uri(),
                details: "missing scheme".to_string(),
            })?;

        // Strip userinfo; this transport does not send an Authorization
        // header, credentials only disambiguate the target host form
        let rest = rest.split_once('@').map(|(_, host)| host).unwrap_or(rest);

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, format!("/{}", path)),
            None => (rest, "/".to_string()),
        };

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| CameraError::InvalidUri {
                    uri: config.sanitized_uri(),
                    details: format!("invalid port '{}'", port),
                })?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), 80),
        };

        if host.is_empty() {
            return Err(CameraError::InvalidUri {
                uri: config.sanitized_uri(),
                details: "empty host".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            path,
            display_uri: config.sanitized_uri(),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            reader: None,
            frame_counter: 0,
        })
    }

    async fn read_part(&mut self) -> Result<Vec<u8>, CameraError> {
        let reader = self.reader.as_mut().ok_or_else(|| CameraError::Read {
            details: "source not connected".to_string(),
        })?;

        // Part headers: skip boundary and blank lines, pick up Content-Length
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| CameraError::Read {
                    details: e.to_string(),
                })?;
            if n == 0 {
                return Err(CameraError::Read {
                    details: "stream closed by server".to_string(),
                });
            }
            let line = line.trim();
            if line.is_empty() {
                if content_length.is_some() {
                    break;
                }
                continue;
            }
            if let Some(value) = line
                .to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(str::trim)
            {
                content_length = Some(value.parse().map_err(|_| CameraError::Read {
                    details: format!("bad Content-Length '{}'", value),
                })?);
            }
        }

        let length = content_length.ok_or_else(|| CameraError::Read {
            details: "part without Content-Length".to_string(),
        })?;

        let mut payload = vec![0u8; length];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| CameraError::Read {
                details: e.to_string(),
            })?;
        Ok(payload)
    }
}

#[async_trait]
impl FrameSource for MjpegHttpSource {
    async fn connect(&mut self) -> Result<(), CameraError> {
        let address = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| CameraError::Connect {
                source_uri: self.display_uri.clone(),
                details: format!("connect timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| CameraError::Connect {
                source_uri: self.display_uri.clone(),
                details: e.to_string(),
            })?;

        let mut reader = BufReader::new(stream);
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n\r\n",
            self.path, self.host
        );
        reader
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|e| CameraError::Connect {
                source_uri: self.display_uri.clone(),
                details: e.to_string(),
            })?;

        // Response headers up to the blank line; only the status matters
        let mut status_ok = false;
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| CameraError::Connect {
                    source_uri: self.display_uri.clone(),
                    details: e.to_string(),
                })?;
            if n == 0 {
                return Err(CameraError::Connect {
                    source_uri: self.display_uri.clone(),
                    details: "connection closed during handshake".to_string(),
                });
            }
            let line = line.trim();
            if line.starts_with("HTTP/") {
                status_ok = line.contains(" 200 ") || line.ends_with(" 200");
            }
            if line.is_empty() {
                break;
            }
        }
        if !status_ok {
            return Err(CameraError::Connect {
                source_uri: self.display_uri.clone(),
                details: "server did not return 200".to_string(),
            });
        }

        debug!(uri = %self.display_uri, "MJPEG stream connected");
        self.reader = Some(reader);
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        let payload = self.read_part().await?;
        self.frame_counter += 1;
        // Dimensions are unknown without decoding; downstream treats MJPEG
        // payloads as opaque
        Ok(FrameData::new(
            self.frame_counter,
            SystemTime::now(),
            payload,
            0,
            0,
            FrameFormat::Mjpeg,
        ))
    }

    async fn disconnect(&mut self) {
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_config(uri: &str) -> CameraConfig {
        let mut config = CameraConfig::new("cam1", uri);
        config.resolution = (64, 48);
        config
    }

    #[tokio::test]
    async fn test_create_source_scheme_dispatch() {
        assert!(create_source(&sim_config("sim://test")).is_ok());
        assert!(create_source(&CameraConfig::new("c", "http://host/stream")).is_ok());

        let err = create_source(&CameraConfig::new("c", "rtsp://host/stream")).unwrap_err();
        assert!(matches!(
            err,
            CameraError::UnsupportedScheme { ref scheme } if scheme == "rtsp"
        ));
    }

    #[tokio::test]
    async fn test_synthetic_source_produces_valid_frames() {
        let mut source = SyntheticSource::from_config(&sim_config("sim://test"));
        source.connect().await.unwrap();

        let first = source.read_frame().await.unwrap();
        let second = source.read_frame().await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.format, FrameFormat::Rgb24);
        assert!(first.validate_size());
    }

    #[tokio::test]
    async fn test_synthetic_fire_feed_paints_flame_pixels() {
        let mut source = SyntheticSource::from_config(&sim_config("sim://fire"));
        source.connect().await.unwrap();
        let frame = source.read_frame().await.unwrap();

        // Lower-right corner pixel sits inside the painted block
        let (w, h) = (frame.width as usize, frame.height as usize);
        let i = ((h - 1) * w + (w - 1)) * 3;
        assert_eq!(frame.data[i], 255);
        assert_eq!(frame.data[i + 1], 120);
        assert_eq!(frame.data[i + 2], 10);
    }

    #[tokio::test]
    async fn test_synthetic_read_before_connect_fails() {
        let mut source = SyntheticSource::new(32, 32, false);
        assert!(source.read_frame().await.is_err());
    }

    #[test]
    fn test_mjpeg_uri_parsing() {
        let source = MjpegHttpSource::from_config(&CameraConfig::new(
            "c",
            "http://camera.local:8081/video.mjpg",
        ))
        .unwrap();
        assert_eq!(source.host, "camera.local");
        assert_eq!(source.port, 8081);
        assert_eq!(source.path, "/video.mjpg");

        let source =
            MjpegHttpSource::from_config(&CameraConfig::new("c", "http://10.0.0.5/stream"))
                .unwrap();
        assert_eq!(source.port, 80);

        // Credentials in the URI are stripped before connecting
        let mut config = CameraConfig::new("c", "http://host/stream");
        config.username = Some("admin".to_string());
        config.password = Some("secret".to_string());
        let source = MjpegHttpSource::from_config(&config).unwrap();
        assert_eq!(source.host, "host");
        assert!(!source.display_uri.contains("secret"));
    }

    #[tokio::test]
    async fn test_mjpeg_stream_over_local_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();

            let payload = vec![0xFFu8, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
            let mut response = Vec::new();
            response.extend_from_slice(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n",
            );
            for _ in 0..2 {
                response.extend_from_slice(b"--frame\r\n");
                response.extend_from_slice(b"Content-Type: image/jpeg\r\n");
                response
                    .extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
                response.extend_from_slice(&payload);
                response.extend_from_slice(b"\r\n");
            }
            socket.write_all(&response).await.unwrap();
        });

        let config = CameraConfig::new("c", format!("http://127.0.0.1:{}/stream", port));
        let mut source = MjpegHttpSource::from_config(&config).unwrap();
        source.connect().await.unwrap();

        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame.format, FrameFormat::Mjpeg);
        assert_eq!(frame.data.len(), 6);
        assert_eq!(frame.data[0], 0xFF);

        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame.id, 2);

        source.disconnect().await;
        server.await.unwrap();
    }
}

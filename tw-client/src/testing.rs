//! Stand-ins for the camera, the AI services and the photo library.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tw::basic_models::{ImageRef, PermissionState};

use crate::gallery::MediaLibrary;
use crate::ingestion::{
    Camera, DescribeImage, EventSource, GenerateImage, GenerationEvent, Photo,
};

/// Writes a blank JPEG of the given size and returns it as a photo.
pub fn blank_photo(dir: &Path, width: u32, height: u32) -> Photo {
    let path = dir.join("capture.jpg");
    image::RgbImage::new(width, height).save(&path).unwrap();
    let jpeg = std::fs::read(&path).unwrap();
    Photo { path, jpeg }
}

pub struct FixedCamera {
    photo: Option<Photo>,
}

impl FixedCamera {
    pub fn new(photo: Photo) -> Self {
        Self { photo: Some(photo) }
    }

    pub fn broken() -> Self {
        Self { photo: None }
    }
}

#[async_trait]
impl Camera for FixedCamera {
    async fn take_photo(&self) -> Result<Photo> {
        self.photo.clone().ok_or_else(|| anyhow!("Camera unavailable"))
    }
}

pub struct CannedDescriber {
    reply: std::result::Result<String, String>,
    delay: Duration,
}

impl CannedDescriber {
    pub fn new(text: &str) -> Self {
        Self {
            reply: Ok(text.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("provider unavailable".into()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl DescribeImage for CannedDescriber {
    async fn request_description(&self, _jpeg_base64: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

/// Plays back a fixed list of generation events and remembers every prompt.
pub struct ScriptedIllustrator {
    script: Vec<std::result::Result<GenerationEvent, String>>,
    start_error: Option<String>,
    delay: Duration,
    idle_timeout: Duration,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedIllustrator {
    pub fn new(script: Vec<std::result::Result<GenerationEvent, String>>) -> Self {
        Self {
            script,
            start_error: None,
            delay: Duration::from_millis(5),
            idle_timeout: Duration::from_secs(10),
            prompts: Default::default(),
        }
    }

    pub fn two_previews_then_done() -> Self {
        Self::new(vec![
            Ok(GenerationEvent::Partial {
                index: 0,
                image: ImageRef::png_base64("P0"),
            }),
            Ok(GenerationEvent::Partial {
                index: 1,
                image: ImageRef::png_base64("P1"),
            }),
            Ok(GenerationEvent::Completed {
                image: ImageRef::png_base64("RklOQUw="),
            }),
        ])
    }

    pub fn refusing_to_start() -> Self {
        let mut illustrator = Self::new(vec![]);
        illustrator.start_error = Some("Image provider error 500".into());
        illustrator
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

struct ScriptedSource {
    events: VecDeque<std::result::Result<GenerationEvent, String>>,
    delay: Duration,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> Result<Option<GenerationEvent>> {
        tokio::time::sleep(self.delay).await;
        match self.events.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl GenerateImage for ScriptedIllustrator {
    async fn start(&self, prompt: &str) -> Result<Box<dyn EventSource>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(err) = &self.start_error {
            return Err(anyhow!(err.clone()));
        }
        Ok(Box::new(ScriptedSource {
            events: self.script.clone().into(),
            delay: self.delay,
        }))
    }

    fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

/// Records imports instead of touching a real library.
pub struct RecordingLibrary {
    current: Mutex<PermissionState>,
    grant_on_request: bool,
    requests: Mutex<usize>,
    imports: Mutex<Vec<(PathBuf, String)>>,
    import_delay: Duration,
}

impl RecordingLibrary {
    pub fn granted() -> Self {
        Self {
            current: Mutex::new(PermissionState::Granted),
            grant_on_request: true,
            requests: Mutex::new(0),
            imports: Mutex::new(vec![]),
            import_delay: Duration::ZERO,
        }
    }

    pub fn refusing() -> Self {
        Self {
            current: Mutex::new(PermissionState::Undetermined),
            grant_on_request: false,
            requests: Mutex::new(0),
            imports: Mutex::new(vec![]),
            import_delay: Duration::ZERO,
        }
    }

    /// Each import takes this long before it is recorded.
    pub fn with_import_delay(mut self, delay: Duration) -> Self {
        self.import_delay = delay;
        self
    }

    pub fn imports(&self) -> Vec<(PathBuf, String)> {
        self.imports.lock().unwrap().clone()
    }

    pub fn permission_requests(&self) -> usize {
        *self.requests.lock().unwrap()
    }
}

#[async_trait]
impl MediaLibrary for RecordingLibrary {
    async fn permission(&self) -> PermissionState {
        *self.current.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionState {
        *self.requests.lock().unwrap() += 1;
        let mut current = self.current.lock().unwrap();
        *current = if self.grant_on_request {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        *current
    }

    async fn import(&self, file: &Path, album: &str) -> Result<PathBuf> {
        tokio::time::sleep(self.import_delay).await;
        self.imports
            .lock()
            .unwrap()
            .push((file.to_path_buf(), album.to_string()));
        Ok(file.to_path_buf())
    }
}

/// An HTTP client that never goes through a proxy, for talking to [`serve_once`].
pub fn direct_http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Answers exactly one HTTP request on 127.0.0.1 with `status` and `body`.
///
/// Returns the server's base URL and a handle resolving to the raw request.
pub async fn serve_once(
    status: &str,
    content_type: &str,
    body: impl Into<Vec<u8>>,
) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let head = format!("HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n");
    let body = body.into();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "{head}Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.shutdown().await.ok();
        request
    });
    (url, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = vec![];
    let mut chunk = [0u8; 4096];
    loop {
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return text;
            }
        }
        let read = socket.read(&mut chunk).await.unwrap();
        if read == 0 {
            return String::from_utf8_lossy(&buf).to_string();
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

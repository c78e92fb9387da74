//! Synthesis backends.
//!
//! Each backend turns one request into an audio file. The generator tries
//! them in order and keeps the first success.

use super::{Engine, TtsError};
use crate::process;
use async_trait::async_trait;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// What kind of voice a backend produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Clones a voice from a reference clip.
    VoiceClone,
    /// Stock neural voices selected by name.
    NeuralVoice,
}

impl Capability {
    /// The engine whose cache entries this backend produces.
    pub fn engine(self) -> Engine {
        match self {
            Capability::VoiceClone => Engine::Xtts,
            Capability::NeuralVoice => Engine::EdgeTts,
        }
    }
}

/// A fully resolved request.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    pub clone_ref: Option<&'a Path>,
    pub language: &'a str,
}

#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    /// Write audio for `request` to `out`.
    async fn synthesize(&self, request: &SynthesisRequest<'_>, out: &Path) -> Result<(), TtsError>;
}

/// Network reachability check.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online if a TCP connection to a well-known DNS server succeeds.
#[derive(Debug, Clone)]
pub struct TcpConnectivity {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpConnectivity {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

impl Default for TcpConnectivity {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 53)), Duration::from_secs(3))
    }
}

#[async_trait]
impl Connectivity for TcpConnectivity {
    async fn is_online(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await,
            Ok(Ok(_))
        )
    }
}

fn require_clone_ref<'a>(backend: &str, request: &SynthesisRequest<'a>) -> Result<&'a Path, TtsError> {
    match request.clone_ref {
        Some(path) if path.is_file() => Ok(path),
        Some(path) => Err(TtsError::Unavailable {
            backend: backend.to_string(),
            reason: format!("speaker reference {} not found", path.display()),
        }),
        None => Err(TtsError::Unavailable {
            backend: backend.to_string(),
            reason: "no speaker reference configured".to_string(),
        }),
    }
}

/// Local XTTS v2 through the Coqui `tts` command line.
#[derive(Debug, Clone)]
pub struct LocalCloneBackend {
    program: PathBuf,
    model: String,
    use_cuda: bool,
    timeout: Duration,
}

impl LocalCloneBackend {
    pub const MODEL: &'static str = "tts_models/multilingual/multi-dataset/xtts_v2";

    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            model: Self::MODEL.to_string(),
            use_cuda: true,
            timeout,
        }
    }

    /// The backend if `tts` is installed.
    pub fn detect(timeout: Duration) -> Option<Self> {
        process::find_program("tts").map(|program| Self::new(program, timeout))
    }

    pub fn with_cuda(mut self, use_cuda: bool) -> Self {
        self.use_cuda = use_cuda;
        self
    }
}

#[async_trait]
impl SynthesisBackend for LocalCloneBackend {
    fn name(&self) -> &str {
        "xtts-local"
    }

    fn capability(&self) -> Capability {
        Capability::VoiceClone
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>, out: &Path) -> Result<(), TtsError> {
        let speaker = require_clone_ref(self.name(), request)?;

        let mut args: Vec<OsString> = vec![
            "--model_name".into(),
            self.model.clone().into(),
            "--text".into(),
            request.text.into(),
            "--speaker_wav".into(),
            speaker.as_os_str().to_owned(),
            "--language_idx".into(),
            request.language.into(),
            "--out_path".into(),
            out.as_os_str().to_owned(),
        ];
        if self.use_cuda {
            args.push("--use_cuda".into());
            args.push("true".into());
        }

        let program = self.program.to_string_lossy();
        process::run_with_timeout(&program, &args, self.timeout)
            .await
            .map_err(|e| TtsError::from_command(self.name(), e))
    }
}

/// Remote XTTS bridge: multipart upload to `{url}/generate_tts`.
#[derive(Debug, Clone)]
pub struct RemoteCloneBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteCloneBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TtsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TtsError::Unavailable {
                backend: "xtts-remote".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/generate_tts", url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SynthesisBackend for RemoteCloneBackend {
    fn name(&self) -> &str {
        "xtts-remote"
    }

    fn capability(&self) -> Capability {
        Capability::VoiceClone
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>, out: &Path) -> Result<(), TtsError> {
        let speaker = require_clone_ref(self.name(), request)?;
        let speaker_bytes = tokio::fs::read(speaker).await?;
        let file_name = speaker
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "speaker.wav".to_string());

        let form = reqwest::multipart::Form::new()
            .text("text", request.text.to_string())
            .text("language", request.language.to_string())
            .part(
                "speaker_file",
                reqwest::multipart::Part::bytes(speaker_bytes).file_name(file_name),
            );

        tracing::debug!(endpoint = %self.endpoint, chars = request.text.len(), "requesting remote clone");

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                TtsError::Timeout {
                    backend: self.name().to_string(),
                }
            } else {
                TtsError::Backend {
                    backend: self.name().to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(map_err)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Backend {
                backend: self.name().to_string(),
                message: format!("server returned {status}: {}", body.chars().take(200).collect::<String>()),
            });
        }

        let audio = response.bytes().await.map_err(map_err)?;
        tokio::fs::write(out, &audio).await?;
        Ok(())
    }
}

/// Cloud neural voices through the `edge-tts` command line.
#[derive(Clone)]
pub struct EdgeTtsBackend {
    program: String,
    connectivity: Arc<dyn Connectivity>,
    timeout: Duration,
}

impl EdgeTtsBackend {
    pub fn new(connectivity: Arc<dyn Connectivity>, timeout: Duration) -> Self {
        Self {
            program: "edge-tts".to_string(),
            connectivity,
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl std::fmt::Debug for EdgeTtsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeTtsBackend")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl SynthesisBackend for EdgeTtsBackend {
    fn name(&self) -> &str {
        "edge-tts"
    }

    fn capability(&self) -> Capability {
        Capability::NeuralVoice
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>, out: &Path) -> Result<(), TtsError> {
        if !self.connectivity.is_online().await {
            return Err(TtsError::Offline);
        }

        let args: [OsString; 6] = [
            "--voice".into(),
            request.voice.into(),
            "--text".into(),
            request.text.into(),
            "--write-media".into(),
            out.as_os_str().to_owned(),
        ];

        process::run_with_timeout(&self.program, &args, self.timeout)
            .await
            .map_err(|e| TtsError::from_command(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticConnectivity;

    fn request<'a>(clone_ref: Option<&'a Path>) -> SynthesisRequest<'a> {
        SynthesisRequest {
            text: "Hello",
            voice: "en-GB-SoniaNeural",
            clone_ref,
            language: "en",
        }
    }

    #[tokio::test]
    async fn test_edge_tts_fails_fast_offline() {
        let backend = EdgeTtsBackend::new(Arc::new(StaticConnectivity(false)), Duration::from_secs(1))
            .with_program("definitely-not-a-real-program-xyz");
        let err = backend
            .synthesize(&request(None), Path::new("unused.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::Offline));
    }

    #[tokio::test]
    async fn test_edge_tts_missing_program_is_unavailable() {
        let backend = EdgeTtsBackend::new(Arc::new(StaticConnectivity(true)), Duration::from_secs(1))
            .with_program("definitely-not-a-real-program-xyz");
        let err = backend
            .synthesize(&request(None), Path::new("unused.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_clone_backends_need_reference() {
        let local = LocalCloneBackend::new("tts", Duration::from_secs(1));
        let err = local.synthesize(&request(None), Path::new("x.wav")).await.unwrap_err();
        assert!(matches!(err, TtsError::Unavailable { .. }));

        let remote = RemoteCloneBackend::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();
        assert_eq!(remote.endpoint(), "http://127.0.0.1:9/generate_tts");
        let missing = Path::new("voices/missing.wav");
        let err = remote
            .synthesize(&request(Some(missing)), Path::new("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::Unavailable { .. }));
    }

    #[test]
    fn test_capability_engines() {
        assert_eq!(Capability::VoiceClone.engine(), Engine::Xtts);
        assert_eq!(Capability::NeuralVoice.engine(), Engine::EdgeTts);
    }
}

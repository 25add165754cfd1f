use crate::dispatcher::Intent;
use crate::error::Result;
use crate::session::Cancellation;

/// Speech front end the daemon drives during a session
///
/// Audio capture, silence detection, transcription and intent
/// classification all live behind this trait, as does speech output.
#[async_trait::async_trait]
pub trait SpeechPipeline: Send + Sync {
    /// Record one utterance and classify it
    ///
    /// Returns `None` when nothing usable was heard. Should stop recording
    /// promptly once `cancel` fires.
    async fn listen(&self, cancel: Cancellation) -> Result<Option<Intent>>;

    /// Say `text` to the user
    async fn speak(&self, text: &str) -> Result<()>;
}

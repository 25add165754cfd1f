use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::ipc::{ControlHandler, ControlMessage, ControlReply};
use crate::pipeline::SpeechPipeline;
use crate::session::{Session, SessionManager};

/// Control-socket front of the daemon
///
/// `trigger` opens a session that runs the speech pipeline once and
/// dispatches whatever intent it hears; `dispatch` skips the pipeline.
pub struct Daemon {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    pipeline: Option<Arc<dyn SpeechPipeline>>,
}

impl Daemon {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionManager>,
        pipeline: Option<Arc<dyn SpeechPipeline>>,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            pipeline,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    fn trigger(&self) -> Result<u64, Error> {
        let pipeline = self.pipeline.clone().ok_or(Error::NoPipeline)?;
        let session = self.sessions.start()?;
        let id = session.id();

        tokio::spawn(run_session(session, pipeline, Arc::clone(&self.dispatcher)));
        Ok(id)
    }
}

#[async_trait::async_trait]
impl ControlHandler for Daemon {
    async fn handle(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::Trigger => match self.trigger() {
                Ok(id) => ControlReply::ok(format!("listening (session {id})")),
                Err(e) => ControlReply::error(e),
            },
            ControlMessage::Stop => {
                if self.sessions.stop() {
                    ControlReply::ok("stopped")
                } else {
                    ControlReply::ok("idle")
                }
            }
            ControlMessage::Dispatch { intent } => match self.dispatcher.dispatch(&intent).await {
                Ok(outcome) => ControlReply::ok(outcome),
                Err(e) => ControlReply::error(e),
            },
        }
    }
}

async fn run_session(session: Session, pipeline: Arc<dyn SpeechPipeline>, dispatcher: Arc<Dispatcher>) {
    let id = session.id();
    let mut cancel = session.cancellation();
    tracing::info!(session = id, "listening");

    let heard = tokio::select! {
        heard = pipeline.listen(session.cancellation()) => heard,
        () = cancel.cancelled() => {
            tracing::info!(session = id, "session cancelled");
            return;
        }
    };

    let intent = match heard {
        Ok(Some(intent)) => intent,
        Ok(None) => {
            tracing::info!(session = id, "nothing heard");
            return;
        }
        Err(e) => {
            tracing::warn!(session = id, error = %e, "speech pipeline failed");
            return;
        }
    };

    let answer = match dispatcher.dispatch(&intent).await {
        Ok(outcome) => {
            tracing::info!(session = id, outcome = outcome.as_str(), "intent handled");
            outcome
        }
        Err(e) => {
            tracing::warn!(session = id, error = %e, "intent failed");
            e.to_string()
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    if let Err(e) = pipeline.speak(&answer).await {
        tracing::warn!(session = id, error = %e, "speech output failed");
    }
}

//! Frame exchange helpers shared by both session roles.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use backhaul_protocol::messages::ErrorMessage;
use backhaul_protocol::{Frame, FrameType};
use backhaul_resilience::{GuardOutcome, TimeoutGuard};
use backhaul_transport::Channel;

use crate::SessionError;

/// Receives a frame, surfacing peer `Error` frames as remote failures.
pub(crate) async fn recv_any(channel: &mut Channel) -> Result<Frame, SessionError> {
    let frame = channel.recv().await?;
    if frame.frame_type == FrameType::Error {
        let err: ErrorMessage = frame.parse()?;
        return Err(SessionError::Remote {
            kind: err.kind,
            message: err.message,
        });
    }
    Ok(frame)
}

/// Receives and decodes a frame of a specific type.
pub(crate) async fn recv_expect<T: DeserializeOwned>(
    channel: &mut Channel,
    expected: FrameType,
) -> Result<T, SessionError> {
    let frame = recv_any(channel).await?;
    Ok(frame.expect(expected)?)
}

/// Runs `future` under the timeout guard, preserving the original error
/// (the guard itself works in failure kinds; the session wants messages).
pub(crate) async fn guarded<T, F>(
    guard: &TimeoutGuard,
    cancel: &CancellationToken,
    label: &str,
    deadline: Duration,
    future: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    let slot: Mutex<Option<SessionError>> = Mutex::new(None);
    let outcome = guard
        .run(label, deadline, cancel, async {
            match future.await {
                Ok(value) => Ok(value),
                Err(err) => {
                    let kind = err.failure_kind();
                    *slot.lock().unwrap() = Some(err);
                    Err(kind)
                }
            }
        })
        .await;

    match outcome {
        GuardOutcome::Ok(value) => Ok(value),
        GuardOutcome::Failed { kind, .. } => match slot.into_inner().unwrap() {
            Some(original) => Err(original),
            None => Err(SessionError::Failure {
                message: kind.to_string(),
                kind,
            }),
        },
    }
}

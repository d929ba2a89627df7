//! Job-control commands.
//!
//! A connection carries one command frame: `ping`, `jobs`, `match <json>`
//! or `stop <json>`. Replies and progress events go back as JSON frames,
//! each acknowledged by the client.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use wikimatch_job::{JobError, JobRegistry};
use wikimatch_job_models::{EventKind, MatchRequest, ProgressEvent, Reply, StopRequest};
use wikimatch_place_models::AreaId;

use crate::ServerError;
use crate::netstring::{read_frame, send_json};

/// A parsed command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Jobs,
    Match(MatchRequest),
    Stop(StopRequest),
}

impl Command {
    /// # Errors
    ///
    /// Returns [`ServerError::Command`] for an unknown verb or
    /// [`ServerError::Json`] for a body that does not parse.
    pub fn parse(frame: &str) -> Result<Self, ServerError> {
        let (verb, body) = frame
            .trim()
            .split_once(' ')
            .map_or((frame.trim(), ""), |(verb, body)| (verb, body.trim()));
        match verb {
            "ping" => Ok(Self::Ping),
            "jobs" => Ok(Self::Jobs),
            "match" => Ok(Self::Match(serde_json::from_str(body)?)),
            "stop" => Ok(Self::Stop(serde_json::from_str(body)?)),
            _ => Err(ServerError::Command {
                message: format!("unknown command {verb:?}"),
            }),
        }
    }
}

/// Serves one connection until its command is answered.
///
/// # Errors
///
/// Returns [`ServerError::Netstring`] if the client sends a bad frame,
/// fails to acknowledge, or goes away.
pub async fn handle_connection<S>(stream: &mut S, registry: &Arc<JobRegistry>) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(frame) = read_frame(stream).await? else {
        return Ok(());
    };
    log::debug!("command: {frame}");

    match Command::parse(&frame) {
        Ok(Command::Ping) => send_json(stream, &Reply::Pong).await?,
        Ok(Command::Jobs) => {
            send_json(stream, &Reply::Jobs { items: registry.list() }).await?;
        }
        Ok(Command::Stop(request)) => {
            let area = AreaId::new(request.osm_type, request.osm_id);
            if !registry.stop(area) {
                log::info!("stop {area}: no running job");
            }
            send_json(stream, &Reply::Stop { success: true }).await?;
        }
        Ok(Command::Match(request)) => stream_job(stream, registry, request).await?,
        Err(e) => {
            log::warn!("bad command {frame:?}: {e}");
            send_json(stream, &Reply::Error { msg: e.to_string() }).await?;
        }
    }
    Ok(())
}

/// Follows the requested area's job, relaying its events until the last.
async fn stream_job<S>(stream: &mut S, registry: &Arc<JobRegistry>, request: MatchRequest) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut subscription = match registry.join_or_start(request).await {
        Ok(subscription) => subscription,
        Err(JobError::AlreadyDone { .. }) => return send_closing(stream, EventKind::AlreadyDone).await,
        Err(JobError::NotFound { .. }) => return send_closing(stream, EventKind::NotFound).await,
        Err(e) => {
            log::error!("match: {e}");
            return Ok(send_json(stream, &Reply::Error { msg: e.to_string() }).await?);
        }
    };

    while let Some(event) = subscription.recv().await {
        send_json(stream, &event).await?;
        if event.is_final() {
            break;
        }
    }
    Ok(())
}

async fn send_closing<S>(stream: &mut S, kind: EventKind) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_json(stream, &ProgressEvent::new(0.0, kind)).await?;
    send_json(stream, &ProgressEvent::new(0.0, EventKind::Done)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use wikimatch_match_models::OsmType;

    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("ping").unwrap(), Command::Ping);
        assert_eq!(Command::parse(" jobs\n").unwrap(), Command::Jobs);
        assert_eq!(
            Command::parse(r#"stop {"osm_type": "relation", "osm_id": 65606}"#).unwrap(),
            Command::Stop(StopRequest {
                osm_type: OsmType::Relation,
                osm_id: 65606,
            })
        );
        let Command::Match(request) =
            Command::parse(r#"match {"osm_type": "way", "osm_id": 4, "want_isa": ["Q16970"]}"#).unwrap()
        else {
            panic!("expected match");
        };
        assert_eq!((request.osm_type, request.osm_id), (OsmType::Way, 4));
        assert_eq!(request.want_isa, vec!["Q16970".to_string()]);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(matches!(Command::parse("restart"), Err(ServerError::Command { .. })));
        assert!(matches!(Command::parse("match {oops"), Err(ServerError::Json(_))));
        assert!(matches!(Command::parse("stop"), Err(ServerError::Json(_))));
    }
}

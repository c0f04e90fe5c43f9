//! Secure-shell remote dispatch: ship a sub-pipeline's wire form to a cluster host,
//! run it there via the `remoteosh` worker binary, and stream its tuples and exceptions
//! back over the same connection.
//!
//! The wire protocol is a handshake followed by a stream of frames: the parent writes
//! `(verbosity, pipeline wire, host descriptor)` as a single object to the child's stdin,
//! then reads a [`RemoteFrame`] per line from its stdout until the child exits. One stderr
//! line is known to be benign noise from `ssh` itself closing a half-duplex connection
//! (`"[Errno 9] Bad file descriptor"`) and is dropped rather than routed to the stderr
//! handler.

use super::error::{self, EngineError, HandlerContext};
use super::identity::{HostDescriptor, WorkerIdentity};
use super::operator::{Operator, OperatorContext, Pipeline, Receiver};
use super::spawn::{self, Spawn};
use super::value::Tuple;
use super::wire::{self, RemoteFrame};

/// Verbosity level sent to the remote worker in the handshake; currently unused on the
/// receiving side beyond being echoed into its own logging setup.
const HANDSHAKE_VERBOSITY: u8 = 0;

const BENIGN_STDERR_LINE: &str = "[Errno 9] Bad file descriptor";

/// Runs a sub-pipeline on a remote host reached over `ssh`, via the `remoteosh` worker
/// binary. Appears only as an operator fork inserts into a worker's local chain when that
/// worker's identity is a [`WorkerIdentity::Host`]; never authored directly in a pipeline.
pub struct Remote {
    inner: Pipeline,
    host: Option<HostDescriptor>,
}

impl Remote {
    /// Wrap `inner`, the sub-pipeline to run on whichever host this operator's worker
    /// clone is attached to.
    pub fn new(inner: Pipeline) -> Remote {
        Remote { inner, host: None }
    }

    fn dispatch(&mut self, host: &HostDescriptor, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let wire = wire::to_wire(&self.inner)?;
        let remote_command = match &host.db_profile {
            Some(profile) => format!("remoteosh {profile}"),
            None => "remoteosh".to_string(),
        };
        let spawn = Spawn::launch_ssh(&host.address, &host.user, host.identity_file.as_deref(), &remote_command)?;

        let handshake = (HANDSHAKE_VERBOSITY, wire, host.clone());
        let mut first_error: Option<EngineError> = None;

        spawn.run::<RemoteFrame, _, _>(
            |stdin| spawn::encode_object(stdin, &handshake),
            |frame| match frame {
                RemoteFrame::Tuple(items) => {
                    if let Err(e) = out.receive(Tuple::new(items)) {
                        first_error.get_or_insert(e);
                    }
                }
                RemoteFrame::Error(envelope) => {
                    let err = envelope.reconstruct();
                    let report = error::handle_exception(
                        &err,
                        HandlerContext {
                            operator: "remote".to_string(),
                            input: None,
                            worker: Some(WorkerIdentity::Host(host.clone())),
                        },
                    );
                    if let Err(e) = report {
                        first_error.get_or_insert(e);
                    }
                }
            },
            |line| {
                if line == BENIGN_STDERR_LINE {
                    return;
                }
                let _ = error::handle_stderr_line(
                    line,
                    HandlerContext {
                        operator: "remote".to_string(),
                        input: None,
                        worker: Some(WorkerIdentity::Host(host.clone())),
                    },
                );
            },
        )?;

        if let Some(err) = first_error {
            return Err(err);
        }
        out.receive_complete()
    }
}

impl Operator for Remote {
    fn name(&self) -> &str {
        "remote"
    }

    fn run_local(&self) -> bool {
        false
    }

    fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
        self.host = match &ctx.identity {
            Some(WorkerIdentity::Host(h)) => Some(h.clone()),
            _ => None,
        };
        Ok(())
    }

    fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| EngineError::RemoteRequired("remote operator requires a host worker identity".to_string()))?;
        self.dispatch(&host, out)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Remote { inner: self.inner.box_clone(), host: self.host.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_a_host_identity_before_execute() {
        let inner = Pipeline::new("empty");
        let mut remote = Remote::new(inner);
        let mut out = super::super::operator::CollectingReceiver::default();
        let err = remote.execute(&mut out).unwrap_err();
        assert!(matches!(err, EngineError::RemoteRequired(_)));
    }

    #[test]
    fn benign_stderr_line_is_recognized() {
        assert_eq!(BENIGN_STDERR_LINE, "[Errno 9] Bad file descriptor");
    }
}

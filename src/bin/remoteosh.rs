//! The remote worker binary: reads a pipeline's wire form and a host descriptor
//! from stdin, runs the pipeline locally, and streams its tuples and exceptions back to
//! the dispatching [`Remote`](osh_engine::engine::Remote) operator as a [`RemoteFrame`]
//! per line of stdout.
//!
//! Launched over `ssh` as `remoteosh [db-profile]`; the optional positional argument names
//! a database profile to resolve against local configuration, mirroring
//! [`osh_engine::engine::HostDescriptor::db_profile`].

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;

use osh_engine::engine::{
    Config, EngineError, HandlerContext, HostDescriptor, OperatorContext, PickleableException, PipelineWire,
    Receiver, RemoteFrame, Tuple, WorkerIdentity, error, spawn, wire,
};

/// Runs a pipeline shipped from a dispatching `osh` process.
#[derive(Parser)]
#[command(name = "remoteosh")]
struct Args {
    /// Database profile to resolve against local configuration, if the dispatched
    /// pipeline's host descriptor named one.
    db_profile: Option<String>,
}

struct FrameWriter<W: Write> {
    out: W,
}

impl<W: Write> Receiver for FrameWriter<W> {
    fn receive(&mut self, tuple: Tuple) -> Result<(), EngineError> {
        spawn::encode_object(&mut self.out, &RemoteFrame::Tuple(tuple.elements().to_vec())).map_err(EngineError::Io)
    }

    fn receive_complete(&mut self) -> Result<(), EngineError> {
        self.out.flush().map_err(EngineError::Io)
    }
}

fn read_handshake(input: &mut impl BufRead) -> anyhow::Result<(u8, PipelineWire, HostDescriptor)> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(serde_json::from_str(&line)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let (_verbosity, pipeline_wire, mut host) = read_handshake(&mut input)?;
    if let Some(profile) = args.db_profile.or(host.db_profile.clone()) {
        host.db_profile = Some(profile);
    }

    let mut pipeline = wire::from_wire(&pipeline_wire)?;
    let ctx = OperatorContext { identity: Some(WorkerIdentity::Host(host.clone())), config: Arc::new(Config::default()) };

    let stdout = io::stdout();
    let mut out = FrameWriter { out: stdout.lock() };

    let result = pipeline.setup(&ctx).and_then(|()| pipeline.execute(&mut out));
    if let Err(err) = result {
        let envelope = PickleableException::capture(pipeline_wire.name.clone(), None, &err);
        spawn::encode_object(&mut out.out, &RemoteFrame::Error(envelope))?;
        error::handle_exception(
            &err,
            HandlerContext { operator: pipeline_wire.name, input: None, worker: Some(WorkerIdentity::Host(host)) },
        )?;
    }
    Ok(())
}

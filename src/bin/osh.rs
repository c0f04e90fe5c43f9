//! Minimal host-side driver that exercises the engine's fork/merge/spawn core directly
//! through the library API, on a couple of built-in demo pipelines.
//!
//! This does **not** reimplement the pipe/fork command-line grammar (`gen 3 ^ f 'x: x'`
//! and friends); that grammar is an out-of-scope external collaborator. It only proves
//! that fork, merge, and the operator chain wire together end to end.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use osh_engine::engine::{
    Apply, CollectingReceiver, Config, Fork, Gen, NullReceiver, Operator, OperatorContext, Pipeline, ThreadGen,
};

/// Drives one of the engine's built-in demo pipelines.
#[derive(Parser)]
#[command(name = "osh")]
struct Args {
    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand)]
enum Scenario {
    /// `gen 3 ^ f 'x: x'`: identity pass-through.
    Identity,
    /// Broadcast one tuple across `width` workers, each tagging and doubling it.
    Fork {
        /// Number of fork workers.
        #[arg(long, default_value_t = 3)]
        width: u32,
    },
    /// Two workers emitting the same increasing sequence, recombined by an ordered merge.
    Merge,
}

fn print_all(out: &CollectingReceiver) {
    for tuple in &out.collected {
        println!("{tuple}");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let ctx = OperatorContext { identity: None, config: Arc::new(Config::default()) };

    match args.scenario {
        Scenario::Identity => {
            let mut pipeline = Pipeline::new("identity");
            pipeline.append(Box::new(Gen::new(3)));
            pipeline.append(Box::new(Apply::new(osh_engine::engine::FunctionValue::parse("x: x")?)));
            pipeline.setup(&ctx)?;
            let mut out = CollectingReceiver::default();
            pipeline.execute(&mut out)?;
            print_all(&out);
        }
        Scenario::Fork { width } => {
            let mut sub = Pipeline::new("tag-and-double");
            sub.append(Box::new(Apply::new(osh_engine::engine::FunctionValue::parse("x: (x, x * 10)")?)));
            let mut fork = Fork::new_broadcast(ThreadGen::Count(width), sub, None);
            fork.setup(&ctx)?;
            let mut sink = NullReceiver;
            fork.receive(osh_engine::engine::Tuple::from_scalar(5i64), &mut sink)?;
            let mut out = CollectingReceiver::default();
            fork.receive_complete(&mut out)?;
            print_all(&out);
        }
        Scenario::Merge => {
            let mut sub = Pipeline::new("count-up");
            sub.append(Box::new(Gen::new(3)));
            let key = osh_engine::engine::FunctionValue::parse("x: x")?;
            let mut fork = Fork::new(ThreadGen::Count(2), sub, Some(key));
            fork.setup(&ctx)?;
            let mut out = CollectingReceiver::default();
            fork.execute(&mut out)?;
            print_all(&out);
        }
    }
    Ok(())
}

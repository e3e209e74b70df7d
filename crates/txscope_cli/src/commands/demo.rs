//! Demo command implementation.

use clap::ValueEnum;
use std::sync::Arc;
use thiserror::Error;
use txscope_core::TxConfig;
use txscope_memory::{MemoryError, RecordStore};
use txscope_testkit::{
    memory_fixture_with_logger, run_callbacks, run_concurrent, run_isolated, run_nested,
    MemoryFixture, PostError, RecordingLogger, Timings, POSTS,
};

/// Scenario selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Racing transactions with rollbacks and an isolated write
    Concurrent,
    /// A failing transaction with one isolated write
    Isolated,
    /// Nested calls joining the outermost session
    Nested,
    /// Success callbacks after commit and rollback
    Callbacks,
    /// Every scenario in turn
    All,
}

impl Scenario {
    fn expand(self) -> Vec<Self> {
        match self {
            Self::All => vec![Self::Concurrent, Self::Isolated, Self::Nested, Self::Callbacks],
            other => vec![other],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::Isolated => "isolated",
            Self::Nested => "nested",
            Self::Callbacks => "callbacks",
            Self::All => "all",
        }
    }
}

/// Errors of the demo command.
#[derive(Debug, Error)]
pub enum DemoError {
    /// A scenario could not run to completion.
    #[error("scenario {scenario} aborted: {source}")]
    Aborted {
        /// Scenario name.
        scenario: &'static str,
        /// Underlying failure.
        source: PostError,
    },

    /// Reading the final record count failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Some expectations were not met.
    #[error("{failed} scenario(s) did not behave as expected")]
    Failed {
        /// Number of scenarios with unmet expectations.
        failed: usize,
    },
}

/// Options of the demo command.
#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    /// Scenario to run.
    pub scenario: Scenario,
    /// Emit the propagation layer's diagnostics as `tracing` events.
    pub log: bool,
    /// Use shorter waits.
    pub fast: bool,
}

/// Runs the demo command.
pub async fn run(options: DemoOptions) -> Result<(), DemoError> {
    let mut failed = 0;
    for scenario in options.scenario.expand() {
        let fx = fixture(options.log);
        tracing::debug!(scenario = scenario.name(), fast = options.fast, "running scenario");
        println!("== {} ==", scenario.name());
        let failures = run_one(scenario, &fx, options.fast)
            .await
            .map_err(|source| DemoError::Aborted {
                scenario: scenario.name(),
                source,
            })?;

        let stats = fx.stats();
        println!(
            "  posts stored: {}  sessions: {} begun, {} committed, {} rolled back",
            fx.raw.count(POSTS).await?,
            stats.begun,
            stats.committed,
            stats.rolled_back
        );
        if failures.is_empty() {
            println!("  ok");
        } else {
            failed += 1;
            for failure in &failures {
                println!("  FAILED: {failure}");
            }
        }
        println!();
    }

    if failed > 0 {
        return Err(DemoError::Failed { failed });
    }
    Ok(())
}

fn fixture(log: bool) -> MemoryFixture {
    let logger = if log {
        RecordingLogger::forwarding()
    } else {
        RecordingLogger::new()
    };
    memory_fixture_with_logger(TxConfig::new().enable_logging(true), Arc::new(logger))
}

async fn run_one(
    scenario: Scenario,
    fx: &MemoryFixture,
    fast: bool,
) -> Result<Vec<String>, PostError> {
    let timings = if fast { Timings::fast() } else { Timings::default() };
    match scenario {
        Scenario::Concurrent => {
            let report = run_concurrent(fx, timings).await?;
            println!("  summarized: {} posts", report.summarized.len());
            println!(
                "  counted: {}",
                report.counted.content.as_deref().unwrap_or_default()
            );
            println!("  after rollback: {} posts", report.after_rollback.len());
            println!("  after isolated write: {} posts", report.after_isolated.len());
            println!("  committed: {}", report.committed.join(", "));
            Ok(report.failures())
        }
        Scenario::Isolated => {
            let report = run_isolated(fx, timings.throw_wait).await?;
            println!("  error: {}", report.error);
            println!("  visible: {} posts", report.visible.len());
            Ok(report.failures())
        }
        Scenario::Nested => {
            let report = run_nested(fx).await?;
            println!("  joined same session: {}", report.joined_same_session);
            println!("  visible before commit: {}", report.visible_before_commit);
            println!("  kept after inner failure: {}", report.kept_after_inner_failure);
            Ok(report.failures())
        }
        Scenario::Callbacks => {
            let report = run_callbacks(fx).await?;
            println!("  immediate: {:?}", report.immediate);
            println!("  after commit: {:?}", report.committed_order);
            println!("  after rollback: {:?}", report.rolled_back_order);
            println!("  failures logged: {}", report.errors_logged);
            println!("  posts kept: {}", report.persisted);
            Ok(report.failures())
        }
        Scenario::All => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_expands_to_every_scenario() {
        assert_eq!(Scenario::All.expand().len(), 4);
        assert_eq!(Scenario::Nested.expand(), vec![Scenario::Nested]);
    }

    #[tokio::test]
    async fn fast_demo_succeeds() {
        let options = DemoOptions {
            scenario: Scenario::All,
            log: false,
            fast: true,
        };
        run(options).await.unwrap();
    }
}

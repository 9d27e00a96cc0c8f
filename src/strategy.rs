//! Ordered fallback ladders.
//!
//! Each rung of a ladder returns a [`Step`]: `Ok` stops the ladder, `Skip` means the rung
//! could not run (missing backend, nothing to search for), `Fail` means it ran and found
//! nothing usable. A [`LadderTrace`] keeps the outcome of every rung for logging and for the
//! failure explanation returned to the caller.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    Ok(T),
    Skip(String),
    Fail(String),
}

impl<T> Step<T> {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Self::Ok(v) => Step::Ok(f(v)),
            Self::Skip(r) => Step::Skip(r),
            Self::Fail(r) => Step::Fail(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RungOutcome {
    Ok,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RungRecord {
    pub rung: String,
    #[serde(flatten)]
    pub outcome: RungOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LadderTrace {
    rungs: Vec<RungRecord>,
}

impl LadderTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&mut self, rung: &str, step: &Step<T>) {
        let outcome = match step {
            Step::Ok(_) => RungOutcome::Ok,
            Step::Skip(r) => RungOutcome::Skipped(r.clone()),
            Step::Fail(r) => RungOutcome::Failed(r.clone()),
        };
        tracing::debug!(rung, ?outcome, "ladder rung finished");
        self.rungs.push(RungRecord { rung: rung.to_string(), outcome });
    }

    pub fn rungs(&self) -> &[RungRecord] {
        &self.rungs
    }

    pub fn attempted(&self) -> Vec<&str> {
        self.rungs.iter().map(|r| r.rung.as_str()).collect()
    }

    /// One-line explanation, e.g. `hints: no match; selector: skipped (empty selector)`.
    pub fn summary(&self) -> String {
        self.rungs
            .iter()
            .map(|r| match &r.outcome {
                RungOutcome::Ok => format!("{}: ok", r.rung),
                RungOutcome::Skipped(reason) => format!("{}: skipped ({reason})", r.rung),
                RungOutcome::Failed(reason) => format!("{}: {reason}", r.rung),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub type Rung<'a, T> = (&'static str, Box<dyn FnOnce() -> Step<T> + 'a>);

pub fn rung<'a, T>(name: &'static str, f: impl FnOnce() -> Step<T> + 'a) -> Rung<'a, T> {
    (name, Box::new(f))
}

/// Runs synchronous rungs in order and returns the first `Ok` value.
pub fn first_ok<T>(trace: &mut LadderTrace, rungs: Vec<Rung<'_, T>>) -> Option<T> {
    for (name, rung) in rungs {
        let step = rung();
        trace.record(name, &step);
        if let Step::Ok(value) = step {
            return Some(value);
        }
    }
    None
}

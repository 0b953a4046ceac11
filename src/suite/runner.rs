//! Suite runner
//!
//! Runs cases one at a time. For each selected case the runner creates a
//! fresh namespace, builds the case context, runs the guard, hooks and
//! body, then removes the namespace whatever the outcome.

use super::{CaseBody, Context, Step, Suite};
use crate::domain::ports::ResourceApi;
use crate::error::{Error, Result};
use crate::lifecycle::{create_namespace, delete_namespace, unique_namespace_name};
use crate::poll::Waiter;
use k8s_openapi::api::core::v1::Namespace;
use serde::Serialize;
use std::path::Path;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// =============================================================================
// Selection
// =============================================================================

/// Which cases to run
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    /// Run only cases carrying at least one of these labels
    pub labels: Vec<String>,
    /// Run only cases whose full name contains this text
    pub focus: Option<String>,
}

impl CaseFilter {
    pub fn matches(&self, full_name: &str, labels: &[&str]) -> bool {
        let label_ok = self.labels.is_empty() || self.labels.iter().any(|l| labels.contains(&l.as_str()));
        let focus_ok = self.focus.as_deref().map_or(true, |f| full_name.contains(f));
        label_ok && focus_ok
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed(String),
    Skipped(String),
    Pending(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub labels: Vec<String>,
    pub namespace: Option<String>,
    pub status: CaseStatus,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&CaseStatus) -> bool) -> usize {
        self.cases.iter().filter(|c| pred(&c.status)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Skipped(_) | CaseStatus::Pending(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn merge(&mut self, other: RunReport) {
        self.cases.extend(other.cases);
    }

    pub fn log_summary(&self) {
        for case in &self.cases {
            match &case.status {
                CaseStatus::Failed(reason) => error!("FAIL {}: {}", case.name, reason),
                CaseStatus::Skipped(reason) => info!("SKIP {}: {}", case.name, reason),
                CaseStatus::Pending(reason) => info!("PENDING {}: {}", case.name, reason),
                CaseStatus::Passed => info!("PASS {} ({:.1}s)", case.name, case.elapsed_secs),
            }
        }
        info!(
            "Ran {} case(s): {} passed, {} failed, {} skipped",
            self.cases.len(),
            self.passed(),
            self.failed(),
            self.skipped()
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// =============================================================================
// Runner
// =============================================================================

pub struct Runner<'a> {
    namespaces: &'a dyn ResourceApi<Namespace>,
    waiter: Waiter,
    filter: CaseFilter,
    security_level: String,
}

impl<'a> Runner<'a> {
    pub fn new(namespaces: &'a dyn ResourceApi<Namespace>, waiter: Waiter, filter: CaseFilter) -> Self {
        Self {
            namespaces,
            waiter,
            filter,
            security_level: "privileged".to_string(),
        }
    }

    pub fn with_security_level(mut self, level: impl Into<String>) -> Self {
        self.security_level = level.into();
        self
    }

    /// Namespace cleanup keeps going after the run is cancelled
    fn cleanup_waiter(&self) -> Waiter {
        Waiter::new(*self.waiter.spec(), CancellationToken::new())
    }

    /// Run every selected case of `suite`, building each case's context
    /// from its namespace with `context_for`.
    pub async fn run<C>(&self, suite: &Suite<C>, mut context_for: impl FnMut(&str) -> C) -> RunReport {
        let mut report = RunReport::default();
        info!("Running suite {}", suite.name);

        for context in &suite.contexts {
            for case in &context.cases {
                let full_name = format!("{} {} {}", suite.name, context.name, case.name);
                if !self.filter.matches(&full_name, case.labels) {
                    continue;
                }

                let labels = case.labels.iter().map(|l| l.to_string()).collect();
                let started = Instant::now();
                let mut namespace = None;

                let status = if self.waiter.cancel_token().is_cancelled() {
                    CaseStatus::Skipped("run cancelled".to_string())
                } else {
                    match &case.body {
                        CaseBody::Pending(reason) => CaseStatus::Pending(reason.to_string()),
                        CaseBody::Run(body) => {
                            let ns = unique_namespace_name(suite.namespace_base);
                            namespace = Some(ns.clone());
                            info!("=== {} [{}]", full_name, ns);
                            self.run_in_namespace(&ns, context, *body, &mut context_for).await
                        }
                    }
                };

                report.cases.push(CaseReport {
                    name: full_name,
                    labels,
                    namespace,
                    status,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
            }
        }

        report
    }

    async fn run_in_namespace<C>(
        &self,
        namespace: &str,
        context: &Context<C>,
        body: Step<C>,
        context_for: &mut impl FnMut(&str) -> C,
    ) -> CaseStatus {
        if let Err(err) = create_namespace(self.namespaces, namespace, &self.security_level, &self.waiter).await {
            return CaseStatus::Failed(format!("creating namespace: {}", err));
        }

        let ctx = context_for(namespace);
        let status = run_case(context, body, &ctx).await;
        drop(ctx);

        let cleanup = delete_namespace(self.namespaces, namespace, &self.cleanup_waiter()).await;
        match (status, cleanup) {
            (CaseStatus::Passed, Err(err)) => CaseStatus::Failed(format!("deleting namespace: {}", err)),
            (status, Err(err)) => {
                warn!("Failed to delete namespace {}: {}", namespace, err);
                status
            }
            (status, Ok(())) => status,
        }
    }
}

/// Guard, before hook, body and after hook of one case.
///
/// The after hook runs whenever the guard let the case start, even if the
/// before hook or the body failed.
async fn run_case<C>(context: &Context<C>, body: Step<C>, ctx: &C) -> CaseStatus {
    if let Some(guard) = context.skip_unless {
        match guard(ctx).await {
            Ok(None) => {}
            Ok(Some(reason)) => return CaseStatus::Skipped(reason),
            Err(err) => return failed("checking preconditions", err),
        }
    }

    let mut status = match context.before_each {
        Some(before) => match before(ctx).await {
            Ok(()) => CaseStatus::Passed,
            Err(err) => failed("before each", err),
        },
        None => CaseStatus::Passed,
    };

    if status == CaseStatus::Passed {
        if let Err(err) = body(ctx).await {
            status = failed("case", err);
        }
    }

    if let Some(after) = context.after_each {
        if let Err(err) = after(ctx).await {
            if status == CaseStatus::Passed {
                status = failed("after each", err);
            } else {
                warn!("After each hook also failed: {}", err);
            }
        }
    }

    status
}

fn failed(stage: &str, err: Error) -> CaseStatus {
    CaseStatus::Failed(format!("{}: {}", stage, err))
}

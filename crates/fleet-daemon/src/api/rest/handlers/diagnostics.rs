//! Memory diagnostics
//!
//! `/wtfheap` streams a plain-text report section by section: process memory
//! counters from procfs where the platform has them, then the live workers
//! grouped by tenant. Each section is produced only when the client pulls it.

use crate::api::rest::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Write;

#[derive(Debug, Clone, Copy)]
enum Section {
    Header,
    ProcStatus,
    SmapsRollup,
    Workers,
}

impl Section {
    fn next(self) -> Option<Section> {
        match self {
            Section::Header => Some(Section::ProcStatus),
            Section::ProcStatus => Some(Section::SmapsRollup),
            Section::SmapsRollup => Some(Section::Workers),
            Section::Workers => None,
        }
    }
}

/// Heap diagnostics endpoint
pub async fn heap_diagnostics(State(state): State<AppState>) -> Response {
    tracing::warn!("Serving memory diagnostics");

    let sections = stream::unfold(Some(Section::Header), move |section| {
        let state = state.clone();
        async move {
            let section = section?;
            let chunk = render(section, &state).await;
            Some((Ok::<_, Infallible>(chunk), section.next()))
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(sections),
    )
        .into_response()
}

async fn render(section: Section, state: &AppState) -> String {
    match section {
        Section::Header => format!(
            "# fleet-daemon {} memory report\n# generated {}\n# uptime {}\n\n",
            state.version,
            chrono::Utc::now().to_rfc3339(),
            state.uptime()
        ),
        Section::ProcStatus => {
            let body = match tokio::fs::read_to_string("/proc/self/status").await {
                Ok(status) => memory_lines(&status),
                Err(e) => format!("unavailable: {}\n", e),
            };
            format!("## /proc/self/status\n{}\n", body)
        }
        Section::SmapsRollup => {
            let body = match tokio::fs::read_to_string("/proc/self/smaps_rollup").await {
                Ok(rollup) => rollup,
                Err(e) => format!("unavailable: {}\n", e),
            };
            format!("## /proc/self/smaps_rollup\n{}\n", body)
        }
        Section::Workers => {
            let summaries = state.actual.lock().await.summaries();
            render_workers(&summaries)
        }
    }
}

/// Keep the memory counters of `/proc/self/status`
fn memory_lines(status: &str) -> String {
    status
        .lines()
        .filter(|line| line.starts_with("Vm") || line.starts_with("Rss") || line.starts_with("Threads"))
        .fold(String::new(), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        })
}

fn render_workers(summaries: &[crate::scheduler::WorkerSummary]) -> String {
    let mut by_tenant: BTreeMap<&str, Vec<&crate::scheduler::WorkerSummary>> = BTreeMap::new();
    for summary in summaries {
        by_tenant
            .entry(summary.tenant_id.as_str())
            .or_default()
            .push(summary);
    }

    let mut out = format!(
        "## workers\ntotal {} across {} tenants\n",
        summaries.len(),
        by_tenant.len()
    );
    for (tenant, workers) in by_tenant {
        let _ = writeln!(out, "{}: {}", tenant, workers.len());
        for worker in workers {
            let _ = writeln!(
                out,
                "  {} version={} since={}",
                worker.worker_id,
                worker.version,
                worker.created_at.to_rfc3339()
            );
        }
    }
    out
}

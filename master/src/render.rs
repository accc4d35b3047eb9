use common::{Report, RunConfig};

use crate::channel::WorkerCommand;

/// Tabla final: una fila por URL, con la ruta relativa a la URL base.
pub fn render_report(report: &Report) -> String {
    let heading = format!(
        "{} Iteration(s) across {} Worker(s): {} Total Jobs",
        report.iterations, report.workers, report.total_jobs
    );

    let rows: Vec<Vec<String>> = report
        .targets
        .iter()
        .map(|t| {
            vec![
                relative_path(&report.base_url, &t.url).to_string(),
                format!("{:.4}s", t.avg_time),
                format!("{:.3}", t.time_deviation),
                format!("{}", t.avg_queries),
            ]
        })
        .collect();

    let mut out = table(
        &[
            heading.as_str(),
            "Avg. Time",
            "Time STD",
            "Avg. Queries",
        ],
        &rows,
    );

    if !report.abandoned.is_empty() {
        out.push_str("\nAbandonados (se agotaron los intentos):\n");
        for url in &report.abandoned {
            out.push_str(&format!("  - {}\n", url));
        }
    }

    out
}

/// Jobs totales y jobs por worker (modo verbose).
pub fn render_plan(total_jobs: usize, jobs_per_worker: usize) -> String {
    table(
        &["Jobs", "Jobs per Worker"],
        &[vec![total_jobs.to_string(), jobs_per_worker.to_string()]],
    )
}

/// Volcado clave/valor de la config (modo verbose).
pub fn render_config(config: &RunConfig, command: &WorkerCommand) -> String {
    let retry = match config.retry.max_attempts {
        Some(max) => format!("max {} intento(s), backoff {:?}", max, config.retry.backoff),
        None => format!("sin límite, backoff {:?}", config.retry.backoff),
    };

    let rows = vec![
        vec!["baseUrl".to_string(), config.base_url.clone()],
        vec!["paths".to_string(), config.paths.join(", ")],
        vec!["iterations".to_string(), config.iterations.to_string()],
        vec!["workers".to_string(), config.workers.to_string()],
        vec!["timeout".to_string(), format!("{}ms", config.timeout_ms)],
        vec!["delay".to_string(), format!("{}ms", config.delay_ms)],
        vec!["verbose".to_string(), config.verbose.to_string()],
        vec!["retry".to_string(), retry],
        vec!["worker".to_string(), command.program().display().to_string()],
    ];

    table(&["key", "value"], &rows)
}

pub(crate) fn relative_path<'a>(base_url: &str, url: &'a str) -> &'a str {
    url.strip_prefix(base_url.trim_end_matches('/'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(url)
}

fn table(head: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = head.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let border = {
        let mut line = String::from("+");
        for w in &widths {
            line.push_str(&"-".repeat(w + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };

    let mut out = border.clone();
    out.push_str(&row_line(head.iter().copied(), &widths));
    out.push_str(&border);
    for row in rows {
        out.push_str(&row_line(row.iter().map(String::as_str), &widths));
    }
    if !rows.is_empty() {
        out.push_str(&border);
    }
    out
}

fn row_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut line = String::from("|");
    for (cell, w) in cells.zip(widths) {
        let pad = w.saturating_sub(cell.chars().count());
        line.push_str(&format!(" {}{} |", cell, " ".repeat(pad)));
    }
    line.push('\n');
    line
}

//! Markdown rendering of aggregated records and curated interactions.

use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::error::DrugFactsError;
use crate::evidence::InteractionRecord;
use crate::record::DrugRecord;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn env() -> Result<&'static Environment<'static>, DrugFactsError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", |s: String, max_bytes: usize| -> String {
        if s.len() <= max_bytes {
            return s;
        }
        if max_bytes == 0 {
            return "…".to_string();
        }
        let mut boundary = max_bytes;
        while boundary > 0 && !s.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let mut out = s[..boundary].trim_end().to_string();
        out.push('…');
        out
    });
    env.add_template(
        "drug_record.md.j2",
        include_str!("../templates/drug_record.md.j2"),
    )?;
    env.add_template(
        "interactions.md.j2",
        include_str!("../templates/interactions.md.j2"),
    )?;

    let _ = ENV.set(env);
    Ok(ENV
        .get()
        .expect("ENV should be initialized by the time this is reached"))
}

pub fn drug_record_markdown(record: &DrugRecord) -> Result<String, DrugFactsError> {
    let tmpl = env()?.get_template("drug_record.md.j2")?;
    let body = tmpl.render(context! { record => record })?;
    Ok(body.trim_end().to_string() + "\n")
}

pub fn interactions_markdown(records: &[InteractionRecord]) -> Result<String, DrugFactsError> {
    let tmpl = env()?.get_template("interactions.md.j2")?;
    let body = tmpl.render(context! {
        count => records.len(),
        records => records,
    })?;
    Ok(body.trim_end().to_string() + "\n")
}

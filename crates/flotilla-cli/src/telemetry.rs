use std::io::Write;

use fastrace::collector::{Config, Reporter, SpanRecord};
use fastrace::prelude::*;
use flotilla_common::error::CommonResult;

pub fn init_telemetry() -> CommonResult<()> {
    init_tracer();
    init_logger();
    Ok(())
}

fn init_tracer() {
    // Spans are kept locally so that trace and span IDs show up in the logs;
    // nothing is exported.
    fastrace::set_reporter(DummyReporter, Config::default());
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = record.level();
            let target = record.target();
            let style = buf.default_level_style(level);
            let timestamp = buf.timestamp();
            let args = record.args();
            if let Some(span_context) = SpanContext::current_local_parent() {
                let trace_id = span_context.trace_id.0;
                let span_id = span_context.span_id.0;
                writeln!(
                    buf,
                    "[{timestamp} {style}{level}{style:#} {target} trace: {trace_id} span: {span_id}] {args}"
                )
            } else {
                writeln!(buf, "[{timestamp} {style}{level}{style:#} {target}] {args}")
            }
        })
        .init();
}

struct DummyReporter;

impl Reporter for DummyReporter {
    fn report(&mut self, _spans: Vec<SpanRecord>) {}
}

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about = "Keeps a per-user snapshot of your unwatched movies")]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Services to run
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ServiceName::all())]
    pub services: Vec<ServiceName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

/// Pretty output for local builds, JSON in release.
fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceName {
    /// HTTP API
    Web,
    /// Cache registry and refresh loops
    Cache,
}

impl ServiceName {
    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Web, ServiceName::Cache]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Web => "web",
            ServiceName::Cache => "cache",
        }
    }
}

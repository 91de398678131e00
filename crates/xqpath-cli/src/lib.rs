use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use owo_colors::{OwoColorize, Stream};
use std::path::PathBuf;
use xqpath::{
    DynamicContextBuilder, ExpandedName, StaticContextBuilder, XdmAtomicValue, compile_xquery_with_context, evaluate,
    model::xml::parse_document_with_base,
};

mod output;

/// Stack reserved for evaluation; deeply recursive user functions run on it.
const EVAL_STACK_SIZE: usize = 256 << 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Evaluate an XQuery/XPath expression against an XML document.
#[derive(Parser, Debug, Clone)]
#[command(name = "xqpath", version, about)]
pub struct Cli {
    /// Query text; use --query-file to read it from a file instead.
    #[arg(value_name = "QUERY", required_unless_present = "query_file")]
    pub query: Option<String>,
    #[arg(long = "query-file", value_name = "PATH", conflicts_with = "query")]
    pub query_file: Option<PathBuf>,
    /// XML document used as the context item.
    #[arg(long, short = 'i', value_name = "PATH")]
    pub input: Option<PathBuf>,
    /// External variable binding as `name=value` (bound as xs:untypedAtomic).
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).without_time().init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let output = std::thread::scope(|scope| {
        std::thread::Builder::new()
            .name("xqpath-eval".into())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, || execute(&cli))
            .context("spawning evaluation thread")?
            .join()
            .map_err(|_| anyhow!("evaluation thread panicked"))?
    })?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn parse_var(binding: &str) -> Result<(ExpandedName, String)> {
    let Some((name, value)) = binding.split_once('=') else {
        bail!("variable binding '{binding}' is not of the form name=value");
    };
    let name = name.trim().trim_start_matches('$');
    if !xqpath::eqname::is_ncname(name) {
        bail!("'{name}' is not a valid variable name");
    }
    Ok((ExpandedName::local(name), value.to_string()))
}

/// Runs the query described by `cli` and returns the rendered result.
pub fn execute(cli: &Cli) -> Result<String> {
    let query = match (&cli.query, &cli.query_file) {
        (Some(q), _) => q.clone(),
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("reading query file {}", path.display()))?
        }
        (None, None) => bail!("no query given"),
    };
    let vars = cli.vars.iter().map(|v| parse_var(v)).collect::<Result<Vec<_>>>()?;

    let mut static_ctx = StaticContextBuilder::new();
    for (name, _) in &vars {
        static_ctx = static_ctx.with_variable(name.clone());
    }
    let compiled = compile_xquery_with_context(&query, &static_ctx.build()).context("compiling query")?;

    let mut dyn_ctx = DynamicContextBuilder::new();
    if let Some(path) = &cli.input {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading input {}", path.display()))?;
        let base = path.canonicalize().ok().map(|p| p.display().to_string());
        let doc = parse_document_with_base(&text, base.as_deref())
            .with_context(|| format!("parsing input {}", path.display()))?;
        dyn_ctx = dyn_ctx.with_context_item(doc);
    }
    for (name, value) in vars {
        dyn_ctx = dyn_ctx.with_variable(name, vec![XdmAtomicValue::UntypedAtomic(value).into()]);
    }

    let result = evaluate(&compiled, &dyn_ctx.build()).context("evaluating query")?;
    tracing::debug!(items = result.len(), "rendering result");
    match cli.format {
        OutputFormat::Text => output::render_text(&result),
        OutputFormat::Json => output::render_json(&result),
    }
}

/// Prints the error chain to stderr, colored when the terminal supports it.
pub fn report_error(error: &anyhow::Error) {
    let label = "error:".if_supports_color(Stream::Stderr, |t| t.bold().red().to_string()).to_string();
    eprintln!("{label} {error}");
    for cause in error.chain().skip(1) {
        let caused = "caused by:".if_supports_color(Stream::Stderr, |t| t.dimmed().to_string()).to_string();
        eprintln!("  {caused} {cause}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("xqpath").chain(args.iter().copied()))
    }

    #[rstest]
    fn evaluates_inline_query() {
        assert_eq!(execute(&cli(&["1 + 2"])).unwrap(), "3");
    }

    #[rstest]
    fn binds_external_variables() {
        let out = execute(&cli(&["--var", "who=world", "concat('hello ', $who)"])).unwrap();
        assert_eq!(out, "hello world");
    }

    #[rstest]
    #[case("who")]
    #[case("1x=2")]
    fn rejects_malformed_bindings(#[case] binding: &str) {
        assert!(execute(&cli(&["--var", binding, "1"])).is_err());
    }

    #[rstest]
    fn json_output_describes_items() {
        let out = execute(&cli(&["--format", "json", "(1, <a/>)"])).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["type"], "atomic");
        assert_eq!(parsed[0]["xs_type"], "xs:integer");
        assert_eq!(parsed[1]["type"], "node");
        assert_eq!(parsed[1]["xml"], "<a/>");
    }

    #[rstest]
    fn reports_error_code() {
        let err = execute(&cli(&["/ * 5"])).unwrap_err();
        let root = err.root_cause().to_string();
        assert!(root.starts_with("err:XPST0003"), "{root}");
    }
}

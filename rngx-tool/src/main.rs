use rngx_model::{compact, CompileOptions, Compiler, FsResources, IncompleteTypes, RelaxError};
use rngx_syntax::writer::write_xml;
use rngx_validator::Validator;
use xmlparser::Tokenizer;

use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Instant;

use structopt::StructOpt;
use url::Url;

#[derive(Debug, StructOpt)]
#[structopt(name = "rngx", about = "RELAX NG (XML syntax) schema compiler and validator")]
enum Cli {
    /// Compile a schema to the compact JSON format
    Convert(ConvertOpts),
    /// Validate XML documents against a schema
    Validate(ValidateOpts),
}

#[derive(Debug, StructOpt)]
struct ConvertOpts {
    /// Simplifier implementation to use
    #[structopt(long, default_value = "internal")]
    simplifier: String,
    /// Schema checker to run before simplification ("rng" or "none")
    #[structopt(long, default_value = "rng")]
    validator: String,
    /// Keep original definition names instead of renumbering them
    #[structopt(long)]
    no_optimize_ids: bool,
    /// Include pattern paths in the output
    #[structopt(long)]
    include_paths: bool,
    /// Output format version
    #[structopt(long, default_value = "3")]
    format_version: u64,
    /// Stop after simplification and write the simplified schema as XML
    #[structopt(long)]
    simplify_only: bool,
    /// Stop simplification after the given step (1-16)
    #[structopt(long)]
    simplify_to: Option<usize>,
    /// Parse and check, writing nothing
    #[structopt(long)]
    no_output: bool,
    /// The input is already simplified; skip the rewrite passes
    #[structopt(long)]
    simplified_input: bool,
    /// Tolerate unsupported datatypes; pass "quiet" to drop the warnings too
    #[structopt(long)]
    allow_incomplete_types: Option<Option<String>>,
    /// Write the intermediate simplified schema next to the input
    #[structopt(long)]
    keep_temp: bool,
    /// More logging
    #[structopt(short, long)]
    verbose: bool,
    /// Report how long each stage took
    #[structopt(long)]
    timing: bool,
    /// Pretty-print the JSON output
    #[structopt(long)]
    verbose_format: bool,
    /// Schema file
    schema: PathBuf,
    /// Output file (stdout when omitted)
    output: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
struct ValidateOpts {
    /// More logging
    #[structopt(short, long)]
    verbose: bool,
    /// Schema file
    schema: PathBuf,
    /// Documents to validate
    xml: Vec<PathBuf>,
}

#[derive(Copy, Clone)]
enum SchemaCheck {
    None,
    Rng,
}

/// Known simplifier and schema-checker implementations, looked up by the
/// names given on the command line.
struct Registry {
    simplifiers: HashMap<&'static str, ()>,
    validators: HashMap<&'static str, SchemaCheck>,
}

impl Registry {
    fn new() -> Registry {
        let mut simplifiers = HashMap::new();
        simplifiers.insert("internal", ());
        let mut validators = HashMap::new();
        validators.insert("rng", SchemaCheck::Rng);
        validators.insert("none", SchemaCheck::None);
        Registry {
            simplifiers,
            validators,
        }
    }

    fn simplifier(&self, name: &str) -> Result<(), String> {
        self.simplifiers
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown simplifier {:?}", name))
    }

    fn validator(&self, name: &str) -> Result<SchemaCheck, String> {
        self.validators
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown validator {:?}", name))
    }
}

fn main() {
    let cli = Cli::from_args();
    let verbose = match &cli {
        Cli::Convert(o) => o.verbose,
        Cli::Validate(o) => o.verbose,
    };
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();
    match std::panic::catch_unwind(AssertUnwindSafe(|| run(cli))) {
        Ok(Ok(())) => {}
        Ok(Err(message)) => {
            eprintln!("{}", message);
            exit(1);
        }
        Err(_) => exit(2),
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli {
        Cli::Convert(opts) => convert(opts),
        Cli::Validate(opts) => validate(opts),
    }
}

fn err(e: impl Display) -> String {
    e.to_string()
}

fn read_schema(path: &Path) -> Result<(String, Url), String> {
    let src = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let absolute = std::fs::canonicalize(path)
        .map_err(|e| format!("cannot resolve {}: {}", path.display(), e))?;
    let base = Url::from_file_path(&absolute)
        .map_err(|()| format!("cannot make a URL of {}", absolute.display()))?;
    Ok((src, base))
}

fn write_output(output: &Option<PathBuf>, data: &[u8]) -> Result<(), String> {
    match output {
        Some(path) => std::fs::write(path, data)
            .map_err(|e| format!("cannot write {}: {}", path.display(), e)),
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(data)
                .and_then(|()| handle.write_all(b"\n"))
                .map_err(|e| format!("cannot write output: {}", e))
        }
    }
}

fn convert(opts: ConvertOpts) -> Result<(), String> {
    let registry = Registry::new();
    registry.simplifier(&opts.simplifier)?;
    let schema_check = registry.validator(&opts.validator)?;
    if opts.format_version != compact::FORMAT_VERSION {
        return Err(err(RelaxError::UnknownFormat(opts.format_version)));
    }

    let (src, base) = read_schema(&opts.schema)?;

    let mut options = CompileOptions::default();
    if let Some(step) = opts.simplify_to {
        options.simplify_to = step;
    }
    options.incomplete_types = match &opts.allow_incomplete_types {
        None => IncompleteTypes::Deny,
        Some(None) => IncompleteTypes::Warn,
        Some(Some(mode)) if mode == "quiet" => IncompleteTypes::Quiet,
        Some(Some(mode)) => {
            return Err(format!("unknown incomplete-types mode {:?}", mode));
        }
    };

    let started = Instant::now();
    if let SchemaCheck::Rng = schema_check {
        if !opts.simplified_input {
            rngx_validator::meta::check_schema_xml(&src).map_err(err)?;
            if opts.timing {
                eprintln!("schema check: {:?}", started.elapsed());
            }
        }
    }

    let compiler = Compiler::with_options(FsResources, options.clone());

    if opts.simplify_only || opts.simplify_to.is_some() {
        let stage = Instant::now();
        let (doc, root) = compiler.simplify_source(&src, &base).map_err(err)?;
        if opts.timing {
            eprintln!("simplification: {:?}", stage.elapsed());
        }
        if !opts.no_output {
            write_output(&opts.output, write_xml(&doc, root).as_bytes())?;
        }
        return Ok(());
    }

    let stage = Instant::now();
    let grammar = if opts.simplified_input {
        compiler.compile_simplified(&src).map_err(err)?
    } else if opts.keep_temp {
        let (doc, root) = compiler.simplify_source(&src, &base).map_err(err)?;
        let tmp = opts.schema.with_extension("simplified.rng");
        std::fs::write(&tmp, write_xml(&doc, root))
            .map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
        log::info!("kept simplified schema at {}", tmp.display());
        rngx_model::compile::compile(&doc, root, &options).map_err(err)?
    } else {
        compiler.compile_source(&src, &base).map_err(err)?
    };
    if opts.timing {
        eprintln!("schema compilation: {:?}", stage.elapsed());
    }

    if opts.no_output {
        return Ok(());
    }
    let stage = Instant::now();
    let json = compact::write_grammar(
        &grammar,
        &compact::WriteOptions {
            rename: !opts.no_optimize_ids,
            paths: opts.include_paths,
        },
    );
    let serialized = if opts.verbose_format {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .map_err(|e| format!("cannot serialise: {}", e))?;
    write_output(&opts.output, serialized.as_bytes())?;
    if opts.timing {
        eprintln!("serialisation: {:?}", stage.elapsed());
    }
    Ok(())
}

fn validate(opts: ValidateOpts) -> Result<(), String> {
    let (src, base) = read_schema(&opts.schema)?;
    let compiler = Compiler::new(FsResources);
    let grammar = compiler.compile_source(&src, &base).map_err(err)?;

    let mut all_errors = Vec::new();
    for xml in &opts.xml {
        let doc = std::fs::read_to_string(xml)
            .map_err(|e| format!("cannot read {}: {}", xml.display(), e))?;
        let validator = Validator::new(&grammar, Tokenizer::from(doc.as_str())).map_err(err)?;
        let report = validator.run().map_err(err)?;
        if report.is_valid() {
            eprintln!("{}: ok", xml.display());
        } else {
            let (map, diagnostics) =
                report.diagnostics(xml.display().to_string(), doc.clone());
            let mut emitter = codemap_diagnostic::Emitter::stderr(
                codemap_diagnostic::ColorConfig::Auto,
                Some(&map),
            );
            emitter.emit(&diagnostics);
            all_errors.extend(report.errors);
        }
    }
    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(err(RelaxError::Validation(all_errors)))
    }
}

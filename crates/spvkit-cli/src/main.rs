use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use spvkit_analysis::{
    back_edges, classify_edges, depth_first_search, dominators, is_reducible, is_structured,
    structurize, AnalysisError, Cfg,
};
use spvkit_codec::CodecError;
use spvkit_ir::{Module, ModuleError};
use spvkit_val::{Validator, ValidatorError};

/// spvkit: SPIR-V assembler, disassembler, and control-flow analyzer
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Disassemble a binary module to the textual form.
    Dis {
        /// Input .spv file
        input: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assemble the textual form into a binary module.
    Asm {
        /// Input text file
        input: PathBuf,

        /// Output path (default: input with a .spv extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze the control flow of every function in a binary module.
    Cfg {
        /// Input .spv file
        input: PathBuf,

        /// Only analyze the function with this result id
        #[arg(long)]
        function: Option<u32>,

        /// Emit Graphviz digraphs instead of the text report
        #[arg(long)]
        dot: bool,
    },

    /// Run the external reference validator on a binary module.
    Validate {
        /// Input .spv file
        input: PathBuf,

        /// Validator program to invoke
        #[arg(long, default_value = spvkit_val::DEFAULT_PROGRAM)]
        validator: String,
    },
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
enum DriverError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error("no function {0} in this module")]
    NoSuchFunction(u32),
}

impl DriverError {
    /// Driver exit codes: 1 validation failure, 2 malformed input,
    /// 3 internal invariant violation.
    fn exit_code(&self) -> u8 {
        match self {
            Self::Validator(ValidatorError::ValidationFailed { .. }) => 1,
            Self::Io { .. }
            | Self::Codec(_)
            | Self::Validator(ValidatorError::Launch { .. })
            | Self::NoSuchFunction(_) => 2,
            Self::Module(_) | Self::Analysis(_) => 3,
        }
    }
}

fn main() -> ExitCode {
    env_logger::try_init().ok();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("Error: {:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<(), DriverError> {
    match cli.command {
        Command::Dis { input, output } => {
            let bytes = read(&input)?;
            let raw = spvkit_codec::decode_module(&bytes)?;
            let text = spvkit_codec::disassemble(&raw);
            write_output(output.as_deref(), text.as_bytes())
        }
        Command::Asm { input, output } => {
            let text = read_text(&input)?;
            let raw = spvkit_codec::assemble(&text)?;
            let bytes = spvkit_codec::encode_module(&raw);
            let output = output.unwrap_or_else(|| input.with_extension("spv"));
            write_output(Some(&output), &bytes)
        }
        Command::Cfg {
            input,
            function,
            dot,
        } => {
            let bytes = read(&input)?;
            let raw = spvkit_codec::decode_module(&bytes)?;
            let module = Module::from_raw(&raw)?;
            module.check_invariants()?;
            analyze(&module, function, dot)
        }
        Command::Validate { input, validator } => {
            let bytes = read(&input)?;
            // Decode first so malformed input is reported as such rather
            // than as a validator rejection.
            spvkit_codec::decode_module(&bytes)?;
            Validator::new(validator).validate(&bytes)?;
            println!("ok");
            Ok(())
        }
    }
}

fn analyze(module: &Module, function: Option<u32>, dot: bool) -> Result<(), DriverError> {
    let mut seen = false;
    for def in module.functions.values() {
        if let Some(wanted) = function {
            if def.id.get() != wanted {
                continue;
            }
        }
        seen = true;
        if def.blocks.is_empty() {
            println!("function {}: declaration only", def.id);
            continue;
        }

        let cfg = Cfg::from_function(def)?;
        if dot {
            print_dot(def.id.get(), &cfg);
            continue;
        }

        let dom = dominators(&cfg)?;
        let dfs = depth_first_search(&cfg, dom.entry);
        let back = back_edges(&cfg, &dfs, &dom);
        let reducible = is_reducible(&cfg, &back);
        let name = module
            .entry_points
            .get(&def.id)
            .map(|ep| ep.name.as_str())
            .or_else(|| {
                module
                    .debug
                    .as_ref()
                    .and_then(|d| d.names.get(&def.id))
                    .map(String::as_str)
            });

        match name {
            Some(name) => println!("function {} (\"{name}\"):", def.id),
            None => println!("function {}:", def.id),
        }
        println!(
            "  {} blocks, {} edges, {}",
            cfg.vertex_count(),
            classify_edges(&cfg, &dfs).len(),
            if reducible { "reducible" } else { "irreducible" },
        );
        for (u, v) in &back {
            println!("  back edge {} -> {}", cfg.labels[*u], cfg.labels[*v]);
        }

        let tree = structurize(&cfg)?;
        println!(
            "  control tree ({}):",
            if is_structured(&tree) {
                "structured"
            } else {
                "unstructured"
            }
        );
        for line in tree.pretty(&cfg.labels).lines() {
            println!("    {line}");
        }
    }

    if let Some(wanted) = function {
        if !seen {
            return Err(DriverError::NoSuchFunction(wanted));
        }
    }
    Ok(())
}

fn print_dot(function: u32, cfg: &Cfg) {
    println!("digraph fn_{function} {{");
    for v in 0..cfg.vertex_count() {
        println!("  n{v} [label=\"{}\"];", cfg.labels[v]);
    }
    for (u, v) in cfg.edges() {
        println!("  n{u} -> n{v};");
    }
    println!("}}");
}

fn read(path: &Path) -> Result<Vec<u8>, DriverError> {
    std::fs::read(path).map_err(|source| DriverError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_text(path: &Path) -> Result<String, DriverError> {
    std::fs::read_to_string(path).map_err(|source| DriverError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<(), DriverError> {
    match path {
        Some(path) => std::fs::write(path, bytes).map_err(|source| DriverError::Io {
            path: path.display().to_string(),
            source,
        }),
        None => std::io::stdout()
            .write_all(bytes)
            .map_err(|source| DriverError::Io {
                path: "<stdout>".into(),
                source,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_dis() {
        let cli = Cli::try_parse_from(["spvkit", "dis", "shader.spv"]).unwrap();
        match cli.command {
            Command::Dis { input, output } => {
                assert_eq!(input, PathBuf::from("shader.spv"));
                assert!(output.is_none());
            }
            _ => panic!("expected dis"),
        }
    }

    #[test]
    fn cli_asm_with_output() {
        let cli =
            Cli::try_parse_from(["spvkit", "asm", "shader.txt", "-o", "out.spv"]).unwrap();
        match cli.command {
            Command::Asm { input, output } => {
                assert_eq!(input, PathBuf::from("shader.txt"));
                assert_eq!(output, Some(PathBuf::from("out.spv")));
            }
            _ => panic!("expected asm"),
        }
    }

    #[test]
    fn cli_cfg_flags() {
        let cli = Cli::try_parse_from(["spvkit", "cfg", "shader.spv", "--function", "4", "--dot"])
            .unwrap();
        match cli.command {
            Command::Cfg {
                function, dot, ..
            } => {
                assert_eq!(function, Some(4));
                assert!(dot);
            }
            _ => panic!("expected cfg"),
        }
    }

    #[test]
    fn cli_validate_default_program() {
        let cli = Cli::try_parse_from(["spvkit", "validate", "shader.spv"]).unwrap();
        match cli.command {
            Command::Validate { validator, .. } => {
                assert_eq!(validator, spvkit_val::DEFAULT_PROGRAM);
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["spvkit"]).is_err());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(
            DriverError::Codec(CodecError::MalformedHeader).exit_code(),
            2
        );
        assert_eq!(
            DriverError::Validator(ValidatorError::ValidationFailed {
                message: "bad".into()
            })
            .exit_code(),
            1
        );
        assert_eq!(
            DriverError::Analysis(AnalysisError::NoEntry).exit_code(),
            3
        );
        assert_eq!(
            DriverError::Module(ModuleError::InvariantViolation("x".into())).exit_code(),
            3
        );
    }
}

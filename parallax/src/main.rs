use clap::{Parser, Subcommand};
use log::{info, warn};
use parallax_core::ast::CallSite;
use parallax_core::{interface, GeneratorConfig, InMemoryKernelCache, KernelCompiler, Offload};
use rspirv::binary::Disassemble;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Times the execution of a closure and prints the elapsed time if verbose.
fn time<T, F: FnOnce() -> T>(name: &str, verbose: bool, f: F) -> T {
    let start = Instant::now();
    let result = f();
    if verbose {
        let elapsed = start.elapsed().as_millis();
        eprintln!("{}: {}ms", name, elapsed);
    }
    result
}

#[derive(Parser)]
#[command(name = "parallax")]
#[command(about = "Compiles parallel-algorithm call sites into SPIR-V compute kernels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a serialized call site to a SPIR-V kernel
    Compile {
        /// Call-site JSON file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (defaults to input name with .spv extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Interface JSON file (defaults to the output name with .interface.json extension)
        #[arg(long, value_name = "FILE")]
        interface: Option<PathBuf>,

        /// Generator configuration JSON file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// SPIR-V version, e.g. 1.3
        #[arg(long, value_parser = parse_version)]
        spirv_version: Option<(u8, u8)>,

        /// Workgroup size along x
        #[arg(long)]
        local_size: Option<u32>,

        /// Name of the compute entry point
        #[arg(long)]
        entry_point: Option<String>,

        /// Skip untranslatable constructs with a warning instead of failing
        #[arg(long)]
        best_effort: bool,

        /// Write the translated IR as text
        #[arg(long, value_name = "FILE")]
        output_ir: Option<PathBuf>,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Disassemble a SPIR-V binary
    Inspect {
        /// SPIR-V file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Compilation error: {0}")]
    CompilationError(#[from] parallax_core::CompilerError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid SPIR-V binary: {0}")]
    InvalidBinary(String),

    #[error("Refusing to overwrite the input file {}", .0.display())]
    WouldOverwriteInput(PathBuf),
}

fn parse_version(s: &str) -> Result<(u8, u8), String> {
    let (major, minor) = s.split_once('.').ok_or_else(|| format!("expected MAJOR.MINOR, got '{}'", s))?;
    let major = major.parse().map_err(|_| format!("invalid major version '{}'", major))?;
    let minor = minor.parse().map_err(|_| format!("invalid minor version '{}'", minor))?;
    Ok((major, minor))
}

fn main() -> Result<(), DriverError> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            output,
            interface,
            config,
            spirv_version,
            local_size,
            entry_point,
            best_effort,
            output_ir,
            verbose,
        } => {
            let mut config = match config {
                Some(path) => GeneratorConfig::load(&path)?,
                None => GeneratorConfig::default(),
            };
            if let Some(version) = spirv_version {
                config.version = version;
            }
            if let Some(x) = local_size {
                config.local_size = [x, 1, 1];
            }
            if let Some(name) = entry_point {
                config.entry_point = name;
            }
            if best_effort {
                config = config.best_effort();
            }
            compile_file(input, output, interface, output_ir, config, verbose)?;
        }
        Commands::Inspect { input } => {
            inspect_file(&input)?;
        }
    }

    Ok(())
}

fn compile_file(
    input: PathBuf,
    output: Option<PathBuf>,
    interface_path: Option<PathBuf>,
    output_ir: Option<PathBuf>,
    config: GeneratorConfig,
    verbose: bool,
) -> Result<(), DriverError> {
    if verbose {
        info!("Compiling {}...", input.display());
    }

    let source = fs::read_to_string(&input)?;
    let site: CallSite = time("load", verbose, || serde_json::from_str(&source))?;
    let compiler = KernelCompiler::new(config);

    if let Some(ref ir_path) = output_ir {
        check_not_input(&input, ir_path)?;
        if let Some(algorithm) = parallax_core::algorithm::ParallelAlgorithm::from_qualified_name(&site.algorithm) {
            let name = parallax_core::kernel::kernel_name(algorithm, site.line);
            let (module, _) = time("translate", verbose, || compiler.build_module(&site, algorithm, &name))?;
            fs::write(ir_path, module.functions.to_string())?;
            if verbose {
                info!("Wrote IR to {}", ir_path.display());
            }
        }
    }

    let mut cache = InMemoryKernelCache::new();
    let kernel = match time("compile", verbose, || compiler.compile_call_site(&site, &mut cache))? {
        Offload::Kernel(kernel) => kernel,
        Offload::Declined(reason) => {
            info!("{}:{} stays on the CPU: {}", input.display(), site.line, reason);
            return Ok(());
        }
    };
    for warning in &kernel.warnings {
        warn!("{}", warning);
    }

    let output_path = output.unwrap_or_else(|| input.with_extension("spv"));
    let interface_path = interface_path.unwrap_or_else(|| default_interface_path(&output_path));
    check_not_input(&input, &output_path)?;
    check_not_input(&input, &interface_path)?;

    let mut file = fs::File::create(&output_path)?;
    for word in &kernel.words {
        file.write_all(&word.to_le_bytes())?;
    }

    fs::write(&interface_path, interface::to_json(&kernel.interface)?)?;

    if verbose {
        info!("Successfully compiled to {}", output_path.display());
        info!("Generated {} words of SPIR-V", kernel.words.len());
        info!("Wrote interface to {}", interface_path.display());
    }

    Ok(())
}

/// `kernel.spv` -> `kernel.interface.json`, next to the binary.
fn default_interface_path(output: &Path) -> PathBuf {
    output.with_extension("interface.json")
}

fn check_not_input(input: &Path, target: &Path) -> Result<(), DriverError> {
    let same = match (fs::canonicalize(input), fs::canonicalize(target)) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == target,
    };
    if same {
        return Err(DriverError::WouldOverwriteInput(target.to_path_buf()));
    }
    Ok(())
}

fn inspect_file(input: &Path) -> Result<(), DriverError> {
    let bytes = fs::read(input)?;
    if bytes.len() % 4 != 0 {
        return Err(DriverError::InvalidBinary(format!("{} bytes is not a whole number of words", bytes.len())));
    }
    let words: Vec<u32> =
        bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
    let module = rspirv::dr::load_words(&words).map_err(|e| DriverError::InvalidBinary(format!("{:?}", e)))?;
    println!("{}", module.disassemble());
    Ok(())
}

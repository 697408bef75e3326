//! Command-line interface for the gradsym symbolic executor.

use clap::{Args, Parser, Subcommand};
use gradsym_exec::{ExecConfig, PsExecutor, SExecutor, SymState};
use gradsym_ir::{compile, is_integer, word_to_float, CompileError, Mem};
use gradsym_solver::GdOptimizer;
use gradsym_sym::{support_product, DiscreteDist, Params, VarDists};
use gradsym_syntax::VarTable;
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI error with source context for pretty printing.
#[derive(Debug, Error, Diagnostic)]
enum CliError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("{message}")]
    #[diagnostic(code(gradsym::compile_error))]
    Compile {
        message: String,
        #[source_code]
        src: NamedSource<Arc<String>>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("{message}")]
    Other { message: String },
}

impl CliError {
    fn from_compile_error(err: CompileError, source: Arc<String>, filename: &str) -> Self {
        let span = match &err {
            CompileError::Parse(parse) => parse.span(),
            CompileError::AssignTarget { span } => *span,
            CompileError::Unsupported { span, .. } => *span,
        };
        CliError::Compile {
            message: err.to_string(),
            src: NamedSource::new(filename, source),
            span: (span.start, span.len().max(1)).into(),
        }
    }
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "gradsym", version)]
#[command(
    about = "Gradient-guided symbolic execution for a small imperative language",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program and print the variable table and instruction listing
    Compile {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Symbolically execute a program and report path satisfiability
    Run {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Pin an input to a concrete value before execution (NAME=VALUE)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        pins: Vec<String>,

        /// Declare a random input (NAME=uniform:LO,HI | NAME=bernoulli:P |
        /// NAME=binomial:N,P); any declaration switches to the
        /// probabilistic executor
        #[arg(long = "random", value_name = "NAME=DIST")]
        randoms: Vec<String>,

        /// Only solve constraints at these program counters (-1 = all)
        #[arg(long = "target-pc", value_name = "PC")]
        target_pcs: Vec<i64>,

        /// Maximum exploration depth per path
        #[arg(long, default_value = "65536")]
        max_depth: u32,

        #[command(flatten)]
        exec: ExecArgs,

        #[command(flatten)]
        optimizer: OptimizerArgs,
    },
}

#[derive(Args)]
struct ExecArgs {
    /// Satisfiable-constraint budget
    #[arg(long, default_value = "65536", help_heading = "Exploration")]
    max_sat: u64,

    /// Unsatisfiable-constraint budget
    #[arg(long, default_value = "65536", help_heading = "Exploration")]
    max_unsat: u64,

    /// Gradient-descent retries per constraint set
    #[arg(long, default_value = "10", help_heading = "Exploration")]
    max_num_trials: u32,

    /// Do not seed solver parameters from concrete memory
    #[arg(long, help_heading = "Exploration")]
    ignore_memory: bool,

    /// Decide boolean structure with DPLL before the numeric solver
    #[arg(long, help_heading = "Exploration")]
    use_dpll: bool,
}

#[derive(Args)]
struct OptimizerArgs {
    /// Gradient-descent iterations per solve call
    #[arg(long, default_value = "100", help_heading = "Optimizer")]
    num_epochs: u32,

    /// Step size
    #[arg(long, default_value = "1.0", help_heading = "Optimizer")]
    lr: f32,

    /// Slack for strict inequalities and negations
    #[arg(long, default_value = "1.0", help_heading = "Optimizer")]
    eps: f32,

    /// Lower bound of initial parameter sampling
    #[arg(long, default_value = "-10", help_heading = "Optimizer")]
    param_low: f32,

    /// Upper bound of initial parameter sampling
    #[arg(long, default_value = "10", help_heading = "Optimizer")]
    param_high: f32,

    /// Use raw gradients instead of sign gradients
    #[arg(long, help_heading = "Optimizer")]
    no_sign_grad: bool,

    /// Sample initial parameters from the reals instead of the integers
    #[arg(long, help_heading = "Optimizer")]
    real_init: bool,

    /// PRNG seed
    #[arg(long, default_value = "42", help_heading = "Optimizer")]
    seed: u64,
}

impl OptimizerArgs {
    fn build(&self) -> GdOptimizer {
        GdOptimizer {
            num_epochs: self.num_epochs,
            lr: self.lr,
            eps: self.eps,
            param_low: self.param_low,
            param_high: self.param_high,
            sign_grad: !self.no_sign_grad,
            init_param_uniform_int: !self.real_init,
            seed: self.seed,
            ..GdOptimizer::default()
        }
    }
}

impl ExecArgs {
    fn build(&self) -> ExecConfig {
        ExecConfig {
            max_sat: self.max_sat,
            max_unsat: self.max_unsat,
            max_num_trials: self.max_num_trials,
            ignore_memory: self.ignore_memory,
            use_dpll: self.use_dpll,
            return_trace: false,
        }
    }
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compile { file } => cmd_compile(&file)?,
        Commands::Run {
            file,
            pins,
            randoms,
            target_pcs,
            max_depth,
            exec,
            optimizer,
        } => cmd_run(
            &file, &pins, &randoms, &target_pcs, max_depth, &exec, &optimizer,
        )?,
    }
    Ok(())
}

fn load_and_compile(file: &PathBuf) -> CliResult<(VarTable, gradsym_ir::Prog, Arc<String>)> {
    let source = fs::read_to_string(file).map_err(|e| CliError::Io {
        path: file.display().to_string(),
        message: e.to_string(),
    })?;
    let source = Arc::new(source);
    let filename = file.display().to_string();
    let (vars, prog) = compile(&source)
        .map_err(|e| CliError::from_compile_error(e, source.clone(), &filename))?;
    Ok((vars, prog, source))
}

fn cmd_compile(file: &PathBuf) -> CliResult<()> {
    let (vars, prog, _) = load_and_compile(file)?;

    println!("variables:");
    for (name, id) in vars.iter() {
        println!("  {}: var_{}", name, id);
    }
    println!("program:");
    for (pc, instr) in prog.iter().enumerate() {
        println!("  {:4}  {}", pc, instr);
    }
    Ok(())
}

fn cmd_run(
    file: &PathBuf,
    pins: &[String],
    randoms: &[String],
    target_pcs: &[i64],
    max_depth: u32,
    exec: &ExecArgs,
    optimizer: &OptimizerArgs,
) -> CliResult<()> {
    let (vars, prog, _) = load_and_compile(file)?;

    let mut init = SymState::new();
    for pin in pins {
        let (var, value) = parse_pin(pin, &vars)?;
        init.set_concrete_val(var, value);
    }

    let mut dists = VarDists::new();
    for decl in randoms {
        let (var, dist) = parse_random(decl, &vars)?;
        dists.insert(var, dist);
    }

    let targets: HashSet<i64> = target_pcs.iter().copied().collect();
    let opt = optimizer.build();
    let config = exec.build();

    if dists.is_empty() {
        let mut executor = SExecutor::new(opt, config);
        executor.run(&prog, &targets, init, max_depth);
        report_deterministic(&executor);
    } else {
        let mut executor = PsExecutor::new(opt, config);
        for &var in dists.keys() {
            executor.register_random_var(var);
        }
        executor.run(&prog, &targets, init, max_depth);
        report_probabilistic(&executor, &dists, optimizer.eps);
    }
    Ok(())
}

fn report_deterministic(executor: &SExecutor) {
    let total = executor.constraints_cache.len();
    let sat = executor
        .constraints_cache
        .values()
        .filter(|(is_sat, _)| *is_sat)
        .count();

    info!(
        iterations = executor.optimizer.num_used_itr,
        "gradient descent accounting"
    );
    if total == 0 {
        println!("no path constraints found");
        return;
    }
    println!("#total path constraints: {}", total);
    println!("#sat: {}", sat);
    println!("#unsat: {}", total - sat);
    for (constraints, (is_sat, params)) in &executor.constraints_cache {
        println!(
            "{} {} params = {}",
            if *is_sat { "sat  " } else { "unsat" },
            constraints,
            render_params(params),
        );
    }
}

fn report_probabilistic(executor: &PsExecutor, dists: &VarDists, eps: f32) {
    let product = support_product(dists);
    let params = Params::new();

    info!(
        iterations = executor.optimizer.num_used_itr,
        "gradient descent accounting"
    );
    if executor.prob_constraints_table.is_empty() {
        println!("no final states found");
        return;
    }
    println!(
        "#final states: {}",
        executor
            .prob_constraints_table
            .values()
            .map(Vec::len)
            .sum::<usize>()
    );
    for (pc, entries) in &executor.prob_constraints_table {
        for (constraints, mem, p) in entries {
            let prob = p.eval(&params, eps, dists, &product);
            if prob > 0.0 {
                println!(
                    "pc={}: prob={:.6}, {} constraints={}",
                    pc,
                    prob,
                    render_mem(mem),
                    constraints.to_text(true),
                );
            }
        }
    }
}

fn render_params(params: &Params) -> String {
    let mut entries: Vec<_> = params.iter().collect();
    entries.sort_by_key(|(var, _)| **var);
    let body: Vec<String> = entries
        .into_iter()
        .map(|(var, val)| {
            if is_integer(*val) {
                format!("var_{}: {}", var, *val as i64)
            } else {
                format!("var_{}: {}", var, val)
            }
        })
        .collect();
    format!("{{{}}}", body.join(", "))
}

fn render_mem(mem: &Mem) -> String {
    let mut entries: Vec<_> = mem.iter().collect();
    entries.sort_by_key(|(var, _)| **var);
    let body: Vec<String> = entries
        .into_iter()
        .map(|(var, word)| {
            let val = word_to_float(*word);
            if is_integer(val) {
                format!("var_{}: {}", var, val as i64)
            } else {
                format!("var_{}: {}", var, val)
            }
        })
        .collect();
    format!("memory={{{}}}", body.join(", "))
}

fn lookup_var(name: &str, vars: &VarTable) -> CliResult<u32> {
    vars.id(name).ok_or_else(|| CliError::Other {
        message: format!("unknown variable: {}", name),
    })
}

fn parse_pin(arg: &str, vars: &VarTable) -> CliResult<(u32, f32)> {
    let (name, value) = arg.split_once('=').ok_or_else(|| CliError::Other {
        message: format!("expected NAME=VALUE, got: {}", arg),
    })?;
    let value: f32 = value.parse().map_err(|_| CliError::Other {
        message: format!("invalid value in pin: {}", arg),
    })?;
    Ok((lookup_var(name, vars)?, value))
}

fn parse_random(arg: &str, vars: &VarTable) -> CliResult<(u32, DiscreteDist)> {
    let (name, dist_spec) = arg.split_once('=').ok_or_else(|| CliError::Other {
        message: format!("expected NAME=DIST, got: {}", arg),
    })?;
    let var = lookup_var(name, vars)?;

    let (kind, args) = dist_spec.split_once(':').ok_or_else(|| CliError::Other {
        message: format!("expected DIST of the form kind:args, got: {}", dist_spec),
    })?;
    let dist = match kind {
        "uniform" => {
            let (lo, hi) = args.split_once(',').ok_or_else(|| CliError::Other {
                message: format!("uniform takes LO,HI, got: {}", args),
            })?;
            let lo: i32 = parse_num(lo, arg)?;
            let hi: i32 = parse_num(hi, arg)?;
            DiscreteDist::uniform(lo, hi)
        }
        "bernoulli" => DiscreteDist::bernoulli(parse_num(args, arg)?),
        "binomial" => {
            let (n, p) = args.split_once(',').ok_or_else(|| CliError::Other {
                message: format!("binomial takes N,P, got: {}", args),
            })?;
            DiscreteDist::binomial(parse_num(n, arg)?, parse_num(p, arg)?)
        }
        other => {
            return Err(CliError::Other {
                message: format!("unknown distribution kind: {}", other),
            });
        }
    };
    Ok((var, dist))
}

fn parse_num<T: std::str::FromStr>(text: &str, context: &str) -> CliResult<T> {
    text.trim().parse().map_err(|_| CliError::Other {
        message: format!("invalid number in: {}", context),
    })
}

use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use tpas_codegen::{self};
use tpas_frontend::{self, dump};

mod diagnostics;

#[derive(Parser)]
#[command(name = "tpas")]
#[command(version = "0.1")]
#[command(about = "tpas compiler driver", long_about = None)]
struct Cli {
    #[arg(help = "Input file to compile")]
    file: PathBuf,

    #[arg(short, long, help = "Output object file")]
    output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Mode::Codegen)]
    mode: Mode,

    #[arg(long, help = "Target triple to generate code for")]
    target: Option<String>,

    #[arg(
        short,
        long,
        default_value_t = false,
        help = "Be verbose during the compilation process"
    )]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Mode {
    ParseOnly,
    ASTDump,
    Semantic,
    IRDump,
    Codegen,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let extension = cli.file.extension();
    if extension.is_none() || extension.unwrap() != "pas" {
        eprintln!(
            "Input file must have extension '.pas' (input file specified is '{}')",
            cli.file.to_string_lossy()
        );
        return ExitCode::FAILURE;
    }

    let input_filename = cli.file.to_string_lossy().to_string();

    let input = match fs::read_to_string(&cli.file) {
        Ok(x) => x,
        Err(e) => {
            eprintln!("Error while reading file '{}': {}", input_filename, e);
            return ExitCode::FAILURE;
        }
    };

    let mut diagnostics = tpas_frontend::diagnostics::Diagnostics::new();
    let emitter = diagnostics::SimpleEmitter::new(&input_filename, &input);

    if cli.verbose {
        eprintln!("Parsing '{}'", input_filename);
    }

    let program = tpas_frontend::parser::parse_program(&input, &mut diagnostics);

    if cli.mode == Mode::ParseOnly || program.is_none() {
        assert!(
            program.is_some() || diagnostics.num_error() > 0,
            "if the parse fails we must diagnose an error"
        );
        diagnostics.report(&emitter);
        return ExitCode::from(diagnostics);
    }
    let program = program.unwrap();

    if cli.verbose {
        eprintln!("Semantic checking '{}'", input_filename);
    }

    let mut semantic_context = tpas_frontend::semantic::SemanticContext::new();
    tpas_frontend::semantic::check_program(&program, &mut semantic_context, &mut diagnostics);

    if cli.mode == Mode::ASTDump {
        diagnostics.report(&emitter);
        let mut dumper = dump::ASTDumper::new(&input, &semantic_context);
        dumper.dump_program(&program);
        println!("{}", dumper);
        return ExitCode::from(diagnostics);
    }

    // Do not hand the tree over to the backend after errors.
    if cli.mode == Mode::Semantic || diagnostics.num_error() > 0 {
        diagnostics.report(&emitter);
        return ExitCode::from(diagnostics);
    }

    if cli.mode == Mode::IRDump {
        let ir = tpas_codegen::codegen::emit_ir(
            cli.target,
            &program,
            &semantic_context,
            &mut diagnostics,
        );
        diagnostics.report(&emitter);
        print!("{}", ir);
        return ExitCode::from(diagnostics);
    }

    let object_filename = match &cli.output {
        Some(output) => output.clone(),
        None => {
            let mut o = cli.file.clone();
            o.set_extension("o");
            o
        }
    };

    if cli.verbose {
        eprintln!(
            "Code generation into '{}'",
            object_filename.to_string_lossy()
        );
    }

    tpas_codegen::codegen::codegen(
        cli.target,
        &program,
        &semantic_context,
        &mut diagnostics,
        &object_filename,
    );

    diagnostics.report(&emitter);
    ExitCode::from(diagnostics)
}

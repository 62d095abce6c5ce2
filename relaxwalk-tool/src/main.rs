use relaxwalk_model::Compiler;
use relaxwalk_validator::Validator;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::exit;
use structopt::StructOpt;

// exit codes: 0 valid, 1 schema error, 2 validation error, 3 i/o error

#[derive(Debug, StructOpt)]
enum Cli {
    Validate { schema: PathBuf, xml: Vec<PathBuf> },
}

fn main() {
    match Cli::from_args() {
        Cli::Validate { schema, xml } => validate(schema, xml),
    }
}

fn validate(schema: PathBuf, xmls: Vec<PathBuf>) {
    let mut compiler = Compiler::default();
    let compiled = match compiler.compile(&schema.to_string_lossy()) {
        Ok(compiled) => compiled,
        Err(err) => {
            compiler.dump_diagnostic(&err);
            if matches!(err, relaxwalk_model::SchemaError::Io(_, _)) {
                exit(3);
            }
            exit(1);
        }
    };
    for warning in &compiled.warnings {
        eprintln!("warning: {}", warning.message);
    }
    for xml in xmls {
        let mut doc = String::new();
        let mut failed = false;
        match File::open(&xml).and_then(|mut f| f.read_to_string(&mut doc)) {
            Ok(_) => {}
            Err(err) => {
                eprintln!("{}: {}", xml.display(), err);
                exit(3);
            }
        }
        let reader = xmlparser::Tokenizer::from(&doc[..]);
        let mut validator = Validator::new(&compiled.grammar, reader);
        eprintln!("Validating {:?}", xml);
        loop {
            match validator.validate_next() {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    failed = true;
                    let (map, diagnostics) = validator.diagnostic(
                        xml.to_string_lossy().to_string(),
                        doc.clone(),
                        &err,
                    );
                    let mut emitter = codemap_diagnostic::Emitter::stderr(
                        codemap_diagnostic::ColorConfig::Auto,
                        Some(&map),
                    );
                    emitter.emit(&diagnostics);
                }
                None => break,
            }
        }
        if let Err(err) = validator.end() {
            failed = true;
            let (map, diagnostics) =
                validator.diagnostic(xml.to_string_lossy().to_string(), doc.clone(), &err);
            let mut emitter = codemap_diagnostic::Emitter::stderr(
                codemap_diagnostic::ColorConfig::Auto,
                Some(&map),
            );
            emitter.emit(&diagnostics);
        }
        if failed {
            exit(2);
        }
    }
}

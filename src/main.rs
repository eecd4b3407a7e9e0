use std::process::ExitCode;

fn main() -> ExitCode {
    match garment_match::run(wild::args_os()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("garment-match: {e}");
            ExitCode::FAILURE
        }
    }
}

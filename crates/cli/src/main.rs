fn main() {
    if let Err(error) = frame_annotator_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

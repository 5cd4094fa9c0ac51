fn main() {
    // The parser and evaluator recurse on expression depth; a 16MB stack
    // keeps deeply nested input (1000+ paren levels) from overflowing.
    const STACK_SIZE: usize = 16 * 1024 * 1024;

    let code = std::thread::Builder::new()
        .stack_size(STACK_SIZE)
        .spawn(nullc::cli::run_cli)
        .expect("Failed to spawn compiler thread")
        .join()
        .expect("Compiler thread panicked");

    std::process::exit(code);
}

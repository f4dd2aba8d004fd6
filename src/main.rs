fn main() {
    if let Err(err) = mermaid_studio::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

use slowlog_digest::{parse_slow_log_file, Options};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "testdata/slow001.log".to_string());
    let parser = parse_slow_log_file(&path, Options::default()).unwrap();
    for event in parser {
        println!("{:?}\n", event.unwrap());
    }
}

use slowlog_digest::{fingerprint, id, parse_slow_log_file, Aggregator, Options};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "testdata/slow001.log".to_string());
    let parser = parse_slow_log_file(&path, Options::default()).unwrap();

    let mut aggregator = Aggregator::new(true, chrono::Duration::zero(), 10.0);
    for event in parser {
        let event = event.unwrap();
        let fingerprint = fingerprint(&event.query);
        let id = id(&fingerprint);
        aggregator.add_event(event, &id, &fingerprint);
    }
    let report = aggregator.finalize();

    // Worst query classes first, by total query time.
    let mut classes: Vec<_> = report.classes.values().collect();
    classes.sort_by(|a, b| {
        let time = |c: &slowlog_digest::Class| {
            c.metrics
                .time_metrics
                .get("Query_time")
                .map_or(0.0, |s| s.sum)
        };
        time(b).partial_cmp(&time(a)).unwrap()
    });

    println!("Aggregated slow query report\n{}\n", "=".repeat(72));
    for class in classes {
        println!("{}  {}", class.id, class.fingerprint);
        println!("- Queries:       {}", class.total_queries);
        if let Some(stats) = class.metrics.time_metrics.get("Query_time") {
            println!("- Total time:    {:.6}s", stats.sum);
            println!("- Min time:      {:.6}s", stats.min.unwrap_or(0.0));
            println!("- P99 time:      {:.6}s", stats.p99.unwrap_or(0.0));
            println!("- Max time:      {:.6}s", stats.max.unwrap_or(0.0));
        }
        if let Some(example) = &class.example {
            println!("- Example:       {}", example.query);
        }
        println!("\n{}\n", "-".repeat(72));
    }

    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}

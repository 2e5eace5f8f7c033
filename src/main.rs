//! Strata CLI - Demand-driven Image Pipelines
//!
//! This is a demonstration CLI for the Strata library.

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use strata::prelude::*;

fn main() {
    env_logger::init();

    // Parse command line args
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("strata");

    if args.len() < 2 {
        print_usage(program);
        return;
    }

    let result = match args[1].as_str() {
        "partition" => partition(&args[2..]),
        "region" => region(&args[2..]),
        "demo" => demo(&args[2..]),
        "list" => {
            list_filters();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(program);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("Strata v{}", strata::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  partition <count> <threads>        Split an index range across threads");
    println!("  region <size,size,...> <threads>   Split an image region across threads");
    println!("  demo [options]                     Build and update a small pipeline");
    println!("  list                               List all available filters");
    println!("  help                               Show this help message");
    println!();
    println!("Demo options:");
    println!("  --threads <n>   Threads per filter (default: from configuration)");
    println!("  --size <WxH>    Image size (default: 256x256)");
    println!("  --json          Print a JSON summary instead of text");
    println!();
    println!("Environment:");
    println!("  RUST_LOG                   Log filter (e.g. strata=debug)");
    println!("  STRATA_NUMBER_OF_THREADS   Default number of threads");
    println!("  STRATA_MAX_THREADS         Upper bound on threads");
}

fn partition(args: &[String]) -> Result<()> {
    let [count, threads] = args else {
        bail!("usage: partition <count> <threads>");
    };
    let count: u64 = count.parse().context("count must be a non-negative integer")?;
    let threads: usize = threads.parse().context("threads must be a non-negative integer")?;

    let domain = IndexRange::with_len(count);
    for thread_id in 0..threads.max(1) {
        let partition = IndexRangePartitioner.partition_domain(thread_id, threads, &domain)?;
        let range = partition.sub_domain;
        if range.is_empty() {
            println!("thread {:>3}: (empty)", thread_id);
        } else {
            let count = range.element_count()?;
            println!("thread {:>3}: {} ({} element(s))", thread_id, range, count);
        }
        if thread_id == 0 {
            info!("{} of {} thread(s) used", partition.threads_used, threads);
        }
    }
    Ok(())
}

fn region(args: &[String]) -> Result<()> {
    let [size, threads] = args else {
        bail!("usage: region <size,size,...> <threads>");
    };
    let size = size
        .split(',')
        .map(|extent| extent.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .context("size must be a comma-separated list of extents")?;
    let threads: usize = threads.parse().context("threads must be a non-negative integer")?;

    let region = ImageRegion::from_size(size);
    println!("Region {} split along axis {:?}", region, RegionPartitioner::split_axis(&region));
    for thread_id in 0..threads.max(1) {
        let partition = RegionPartitioner.partition_domain(thread_id, threads, &region)?;
        println!("thread {:>3}: {}", thread_id, partition.sub_domain);
    }
    Ok(())
}

fn list_filters() {
    let registry = FilterRegistry::global();
    let grouped = registry.grouped_by_category();

    println!("Available filters ({} total):", registry.len());
    println!();

    for (category, filters) in grouped {
        println!("  {}", category.display_name());
        for metadata in filters {
            println!("      {} - {}", metadata.tag, metadata.description);
            for parameter in &metadata.parameters {
                println!("          {} = {}", parameter.name, parameter.default);
            }
        }
        println!();
    }
}

#[derive(Debug, Serialize)]
struct UpdateReport {
    step: &'static str,
    duration_ms: f64,
    generated: Vec<String>,
    statistics: Option<ImageStatistics>,
}

#[derive(Debug, Serialize)]
struct DemoSummary {
    threads: usize,
    size: [u64; 2],
    updates: Vec<UpdateReport>,
}

fn demo(args: &[String]) -> Result<()> {
    let mut threads: Option<usize> = None;
    let mut size = [256u64, 256];
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--threads" if i + 1 < args.len() => {
                threads = Some(args[i + 1].parse().context("--threads expects a number")?);
                i += 2;
            }
            "--size" if i + 1 < args.len() => {
                size = parse_dimensions(&args[i + 1]).context("--size expects WxH, e.g. 640x480")?;
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other => bail!("Unknown option: {}", other),
        }
    }

    let mut config = ThreadingConfig::from_env()?;
    if let Some(threads) = threads {
        let threads = config.clamp(threads);
        config = config.with_default_threads(threads);
    }
    let driver = Arc::new(ParallelDriver::new(config)?);
    let registry = FilterRegistry::global();
    let create = |tag: &str| registry.create(tag).with_context(|| format!("filter '{}' is not registered", tag));

    let mut graph = PipelineGraph::new().with_driver(Arc::clone(&driver));
    let source = graph.add_node_with_label(create("gradient_source")?, "source");
    graph.set_parameter(source, "size", size.to_vec())?;
    graph.set_parameter(source, "step", 0.5)?;
    let noise = graph.add_node_with_label(create("additive_noise")?, "noise");
    let mean = graph.add_node_with_label(create("box_mean")?, "mean");
    let stats = graph.add_node_with_label(create("statistics")?, "statistics");
    graph.connect(source, 0, noise, 0)?;
    graph.connect(noise, 0, mean, 0)?;
    graph.connect(mean, 0, stats, 0)?;

    let (observer, events) = channel_observer();
    graph.add_observer(observer);

    let mut updates = Vec::new();
    let steps: [(&'static str, Option<(NodeId, &str, Value)>); 3] = [
        ("initial", None),
        ("unchanged", None),
        ("radius changed", Some((mean, "radius", Value::Size(vec![3])))),
    ];
    for (step, change) in steps {
        if let Some((node, name, value)) = change {
            graph.set_parameter(node, name, value)?;
        }

        let started = Instant::now();
        graph.update(stats)?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let generated = events
            .try_iter()
            .filter_map(|event| match event {
                PipelineEvent::End { node_id } => Some(node_id),
                _ => None,
            })
            .map(|node_id| {
                graph
                    .node(node_id)
                    .map(|node| node.display_name())
                    .unwrap_or_else(|_| node_id.to_string())
            })
            .collect();
        let statistics = graph.output_value::<ImageStatistics>(stats, 0)?.copied();

        updates.push(UpdateReport {
            step,
            duration_ms,
            generated,
            statistics,
        });
    }

    let summary = DemoSummary {
        threads: driver.number_of_threads(),
        size,
        updates,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Pipeline source -> noise -> mean -> statistics over {}x{} on {} thread(s)",
        summary.size[0], summary.size[1], summary.threads
    );
    for update in &summary.updates {
        let generated = if update.generated.is_empty() {
            "nothing".to_string()
        } else {
            update.generated.join(", ")
        };
        println!("  {:<15} {:>9.2} ms  generated: {}", update.step, update.duration_ms, generated);
        if let Some(statistics) = &update.statistics {
            println!(
                "  {:<15} mean {:.4}  sigma {:.4}  range [{:.4}, {:.4}]",
                "", statistics.mean, statistics.sigma(), statistics.minimum, statistics.maximum
            );
        }
    }
    Ok(())
}

fn parse_dimensions(s: &str) -> Option<[u64; 2]> {
    let (w, h) = s.split_once('x')?;
    Some([w.parse().ok()?, h.parse().ok()?])
}

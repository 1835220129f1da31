//! Example walking a store through its whole life.
//!
//! This example shows how to:
//! - Create a store from a JSON definition
//! - Send samples immediately and in a cached batch
//! - Fetch a consolidated matrix
//! - Export a computed series
//!
//! Run with: `cargo run -p rrdgate --features librrd --example store_walkthrough`

use rrdgate::{Creator, Exporter, Librrd, StoreDefinition, Updater, Value, fetch};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = std::env::temp_dir().join("rrdgate-walkthrough");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("host.rrd");
    let path = path.to_string_lossy().into_owned();

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let start = UNIX_EPOCH + Duration::from_secs(now.as_secs() - 60);
    let step = Duration::from_secs(1);

    // One counter and one gauge, kept at 1s and 5s resolution
    let def = StoreDefinition::from_json_str(&format!(
        r#"{{
            "filename": "{path}",
            "step": 1,
            "start": {start},
            "data_sources": [
                {{ "type": "COUNTER", "name": "cnt", "heartbeat": 2, "min": 0, "max": 100 }},
                {{ "type": "GAUGE", "name": "g", "heartbeat": 2, "min": 0, "max": 60 }}
            ],
            "archives": [
                {{ "cf": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 100 }},
                {{ "cf": "AVERAGE", "xff": 0.5, "steps": 5, "rows": 100 }}
            ]
        }}"#,
        start = now.as_secs() - 60,
    ))?;
    Creator::from_definition(&def).create(&Librrd, true)?;
    println!("created {path}");

    let mut updater = Updater::new(path.as_str());
    for i in 1..=10u32 {
        let values = [Value::from(i), Value::from(1.5 * f64::from(i))];
        updater.update(&Librrd, start + step * i, &values)?;
    }
    for i in 11..=20u32 {
        updater.cache(start + step * i, &[Value::from(i), Value::from(2.0 * f64::from(i))]);
    }
    println!("flushing {} cached samples", updater.pending().len());
    updater.flush(&Librrd)?;

    let end = start + step * 20;
    let res = fetch(&Librrd, &path, "AVERAGE", start, end, step)?;
    println!("\nfetch: {} rows, step {:?}", res.row_count(), res.step());
    println!("{:>12} {}", "time", res.ds_names().join("\t"));
    for row in 0..res.row_count() {
        let ts = res.time_at(row).map_or(0, rrdgate::gateway::unix_seconds);
        let values: Vec<String> = res
            .row(row)
            .unwrap_or_default()
            .iter()
            .map(|v| format!("{v:e}"))
            .collect();
        println!("{ts:>12} {}", values.join("\t"));
    }
    res.free_values();

    let mut exporter = Exporter::new();
    exporter
        .def("def1", &path, "cnt", "AVERAGE")
        .def("def2", &path, "g", "AVERAGE")
        .cdef("vdef1", "def1,def2,+")
        .xport_def("def1", "cnt")
        .xport_def("def2", "g")
        .xport_def("vdef1", "sum");
    let out = exporter.xport(&Librrd, start, end, step)?;
    println!("\nxport: {} rows", out.row_count());
    println!("{}", out.legends().join("\t"));
    for row in 0..out.row_count() {
        let values: Vec<String> = out
            .row(row)
            .unwrap_or_default()
            .iter()
            .map(|v| format!("{v:e}"))
            .collect();
        println!("{}", values.join("\t"));
    }

    Ok(())
}

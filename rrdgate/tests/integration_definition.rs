//! Integration tests for store definitions and custom engines.
//!
//! These exercise the public API without librrd: definitions are loaded
//! from JSON files, and the engine is a recording implementation of
//! [`rrdgate::Engine`] living outside the crate.

use libc::{c_char, c_int, c_ulong, time_t};
use rrdgate::{Creator, Engine, RrdError, StoreDefinition, Updater, Value};
use std::ffi::CStr;
use std::ptr;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::tempdir;

/// Records argument vectors and fails on demand with a malloc'd message.
#[derive(Default)]
struct RecordingEngine {
    calls: Mutex<Vec<Vec<String>>>,
    fail_with: Mutex<Option<&'static CStr>>,
}

impl RecordingEngine {
    fn record(&self, argc: c_int, argv: *const *const c_char) -> *mut c_char {
        let args = (0..usize::try_from(argc).unwrap())
            // SAFETY: The binding passes `argc` valid C strings.
            .map(|i| unsafe { CStr::from_ptr(*argv.add(i)) }.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().unwrap().push(args);
        match self.fail_with.lock().unwrap().take() {
            // SAFETY: strdup copies a valid C string; the binding frees it.
            Some(message) => unsafe { libc::strdup(message.as_ptr()) },
            None => ptr::null_mut(),
        }
    }
}

// SAFETY: Error strings are strdup'd, so the default `free` releaser
// matches. Retrieval calls are refused without handing out buffers.
unsafe impl Engine for RecordingEngine {
    unsafe fn create(
        &self,
        _: *const c_char,
        _: c_ulong,
        _: time_t,
        argc: c_int,
        argv: *const *const c_char,
    ) -> *mut c_char {
        self.record(argc, argv)
    }

    unsafe fn update(
        &self,
        _: *const c_char,
        _: *const c_char,
        argc: c_int,
        argv: *const *const c_char,
    ) -> *mut c_char {
        self.record(argc, argv)
    }

    unsafe fn fetch(
        &self,
        _: *const c_char,
        _: *const c_char,
        _: *mut time_t,
        _: *mut time_t,
        _: *mut c_ulong,
        _: *mut c_ulong,
        _: *mut *mut *mut c_char,
        _: *mut *mut f64,
    ) -> *mut c_char {
        // SAFETY: strdup copies a valid C string.
        unsafe { libc::strdup(c"fetch not supported".as_ptr()) }
    }

    unsafe fn xport(
        &self,
        _: c_int,
        _: *mut *mut c_char,
        _: *mut c_int,
        _: *mut time_t,
        _: *mut time_t,
        _: *mut c_ulong,
        _: *mut c_ulong,
        _: *mut *mut *mut c_char,
        _: *mut *mut f64,
    ) -> *mut c_char {
        // SAFETY: strdup copies a valid C string.
        unsafe { libc::strdup(c"xport not supported".as_ptr()) }
    }
}

const DEFINITION: &str = r#"{
    "filename": "/var/lib/rrd/host.rrd",
    "step": 300,
    "start": 1700000000,
    "data_sources": [
        { "type": "DERIVE", "name": "regular_ds", "heartbeat": 900, "min": 0.0 },
        { "type": "COMPUTE", "name": "computed_ds", "rpn": "regular_ds,8,*" }
    ],
    "archives": [
        { "cf": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 288 },
        { "cf": "MAX", "xff": 0.5, "steps": 12, "rows": 168 },
        { "cf": "HWPREDICT", "rows": 1440, "alpha": 0.1, "beta": 0.0035, "period": 288 }
    ]
}"#;

#[test]
fn test_definition_file_to_creator() {
    let dir = tempdir().unwrap();
    let def_path = dir.path().join("host.json");
    std::fs::write(&def_path, DEFINITION).unwrap();

    let def = StoreDefinition::load(&def_path).unwrap();
    assert_eq!(def.step, Duration::from_secs(300));
    assert_eq!(def.data_sources.len(), 2);

    let creator = Creator::from_definition(&def);
    assert_eq!(
        creator.args(),
        [
            "DS:regular_ds:DERIVE:900:0.0000000000e0:U",
            "DS:computed_ds:COMPUTE:regular_ds,8,*",
            "RRA:AVERAGE:5.0000000000e-1:1:288",
            "RRA:MAX:5.0000000000e-1:12:168",
            "RRA:HWPREDICT:1440:1.0000000000e-1:3.5000000000e-3:288",
        ]
    );

    let engine = RecordingEngine::default();
    creator.create(&engine, true).unwrap();
    assert_eq!(engine.calls.lock().unwrap()[0], creator.args());
}

#[test]
fn test_definition_errors() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("missing.json");
    let err = StoreDefinition::load(&missing).unwrap_err();
    assert!(matches!(err, RrdError::DefinitionRead { ref path, .. } if *path == missing));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, r#"{ "filename": "x.rrd", "step": "soon" }"#).unwrap();
    let err = StoreDefinition::load(&broken).unwrap_err();
    assert!(matches!(err, RrdError::DefinitionParse(_)));
}

#[test]
fn test_external_engine_errors_are_copied_and_freed() {
    let engine = RecordingEngine::default();
    let mut u = Updater::new("/tmp/external.rrd");
    u.cache(UNIX_EPOCH + Duration::from_secs(100), &[Value::from(1)]);
    u.cache(UNIX_EPOCH + Duration::from_secs(101), &[Value::Unknown]);

    *engine.fail_with.lock().unwrap() = Some(c"illegal attempt to update using time 100");
    let err = u.flush(&engine).unwrap_err();
    assert_eq!(
        err.to_string(),
        "engine error: illegal attempt to update using time 100"
    );
    assert_eq!(u.pending().len(), 2);

    u.flush(&engine).unwrap();
    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], ["100:1", "101:U"]);

    let err = rrdgate::fetch(
        &engine,
        "/tmp/external.rrd",
        "AVERAGE",
        UNIX_EPOCH,
        UNIX_EPOCH + Duration::from_secs(10),
        Duration::from_secs(1),
    )
    .unwrap_err();
    assert_eq!(err.as_engine().unwrap().message(), "fetch not supported");
}

use std::collections::BTreeMap;

use glider_netcdf::format::{ArrayData, DataType, NcFile, Scalar};
use glider_netcdf::{
    with_session, Error, GliderSession, OpenMode, Record, SessionState, VariableDescriptor,
};
use serde_json::json;
use tempfile::tempdir;

fn depth_schema() -> BTreeMap<String, VariableDescriptor> {
    serde_json::from_value(json!({
        "depth-m": {
            "name": "depth",
            "type": "f8",
            "dimension": "time",
            "global_bound": "depth",
            "attrs": { "_FillValue": 9999, "units": "m", "standard_name": "depth" },
            "status_flag": { "attrs": { "long_name": "depth Quality Flag" } }
        }
    }))
    .expect("schema")
}

fn uv_schema() -> BTreeMap<String, VariableDescriptor> {
    serde_json::from_value(json!({
        "time_uv_dim": { "name": "time_uv", "is_dimension": true, "dimension_length": 1 },
        "time_uv": { "name": "time_uv", "type": "f8", "dimension": "time_uv" },
        "lat_uv": { "name": "lat_uv", "type": "f8", "dimension": "time_uv" },
        "lon_uv": { "name": "lon_uv", "type": "f8", "dimension": "time_uv" },
        "m_water_vx-m/s": { "name": "u", "type": "f8", "dimension": "time_uv" },
        "m_gps_lat-lat": { "name": "m_gps_lat", "type": "f8", "dimension": "time" },
        "m_gps_lon-lon": { "name": "m_gps_lon", "type": "f8", "dimension": "time" }
    }))
    .expect("schema")
}

#[test]
fn depth_scenario_bounds_exclude_fill() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("depth.nc");

    let mut session = GliderSession::builder(&path)
        .schema(depth_schema())
        .open()
        .expect("open");
    assert_eq!(session.state(), SessionState::OpenEmpty);
    session
        .insert_record(&Record::new().with("timestamp", 100.0).with("depth-m", 1.0))
        .expect("insert 100");
    session
        .insert_record(&Record::new().with("timestamp", 101.0).with("depth-m", 9999.0))
        .expect("insert 101");
    session
        .insert_record(&Record::new().with("timestamp", 102.0).with("depth-m", 3.0))
        .expect("insert 102");
    assert_eq!(session.state(), SessionState::OpenStreaming);
    session.close().expect("close");

    let file = NcFile::read_only(&path).expect("read back");
    let ds = file.dataset();
    assert_eq!(ds.attrs.get("depth_min").and_then(|v| v.as_f64()), Some(1.0));
    assert_eq!(ds.attrs.get("depth_max").and_then(|v| v.as_f64()), Some(3.0));
    assert_eq!(ds.attrs.get("depth_units").and_then(|v| v.as_text()), Some("m"));
    assert_eq!(
        ds.variable("time").expect("time").data,
        ArrayData::Double(vec![100.0, 101.0, 102.0])
    );
    assert_eq!(
        ds.variable("depth_qc").expect("depth_qc").data,
        ArrayData::Byte(vec![0, 9, 0])
    );
}

#[test]
fn time_values_round_trip_exactly() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("time.nc");
    let stamps = [1_393_990_217.123_456_7, 1_393_990_218.000_001, 4.0e9 + 0.5];

    with_session(GliderSession::builder(&path), |session| {
        for t in stamps {
            session.insert_record(&Record::new().with("timestamp", t))?;
        }
        Ok(())
    })
    .expect("write");

    let file = NcFile::read_only(&path).expect("read back");
    let time = file.dataset().variable("time").expect("time");
    for (i, t) in stamps.iter().enumerate() {
        assert_eq!(time.read_row(i), Some(Scalar::Double(*t)));
    }
    assert_eq!(
        file.dataset().variable("time_qc").expect("time_qc").data,
        ArrayData::Byte(vec![0, 0, 0])
    );
}

#[test]
fn append_keeps_existing_rows() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("append.nc");

    with_session(GliderSession::builder(&path).schema(depth_schema()), |session| {
        for i in 0..5 {
            let t = 100.0 + i as f64;
            session.insert_record(&Record::new().with("timestamp", t).with("depth-m", i as f64))?;
        }
        Ok(())
    })
    .expect("first pass");
    let before = NcFile::read_only(&path).expect("read").dataset().clone();

    let cursor = with_session(
        GliderSession::builder(&path)
            .mode(OpenMode::Append)
            .schema(depth_schema()),
        |session| {
            assert_eq!(session.cursor(), 5);
            assert_eq!(session.state(), SessionState::OpenStreaming);
            session.insert_record(&Record::new().with("timestamp", 105.0))?;
            session.insert_record(&Record::new().with("timestamp", 106.0).with("depth-m", 8.0))?;
            Ok(session.cursor())
        },
    )
    .expect("append pass");
    assert_eq!(cursor, 7);

    let file = NcFile::read_only(&path).expect("read");
    let ds = file.dataset();
    let time = ds.variable("time").expect("time");
    assert_eq!(time.rows(), 7);
    let old_time = &before.variable("time").expect("time").data;
    let mut old_bytes = Vec::new();
    old_time.write_be(0, 5, &mut old_bytes);
    let mut new_bytes = Vec::new();
    time.data.write_be(0, 5, &mut new_bytes);
    assert_eq!(old_bytes, new_bytes);

    let depth = ds.variable("depth").expect("depth");
    assert_eq!(depth.read_row(5), Some(Scalar::Double(9999.0)));
    assert_eq!(depth.read_row(6), Some(Scalar::Double(8.0)));
    assert_eq!(ds.attrs.get("depth_max").and_then(|v| v.as_f64()), Some(8.0));
}

#[test]
fn reregistering_on_append_leaves_structure_alone() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("idempotent.nc");

    let mut session = GliderSession::builder(&path)
        .schema(depth_schema())
        .open()
        .expect("open");
    session.register_all(&depth_schema()).expect("register again");
    let first = session.dataset().expect("open").clone();
    session.register_all(&depth_schema()).expect("register third time");
    assert_eq!(session.dataset().expect("open"), &first);
    session.close().expect("close");

    let mut session = GliderSession::open(&path, OpenMode::Append).expect("reopen");
    session.register_all(&depth_schema()).expect("register on append");
    let ds = session.dataset().expect("open");
    let depth = ds.variable("depth").expect("depth");
    let names: Vec<_> = depth.attrs.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(
        names,
        ["_FillValue", "standard_name", "units", "ancillary_variables"]
    );
    assert_eq!(ds.vars.len(), first.vars.len());
    session.close().expect("close");
}

#[test]
fn companions_follow_only_the_trigger() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("uv.nc");

    with_session(GliderSession::builder(&path).schema(uv_schema()), |session| {
        session.insert_record(
            &Record::new()
                .with("timestamp", 200.0)
                .with("m_gps_lat-lat", 27.1)
                .with("m_gps_lon-lon", -82.9),
        )?;
        assert_eq!(session.get_scalar("time_uv")?, None);
        assert_eq!(session.get_scalar("lat_uv")?, None);
        assert_eq!(session.get_scalar("lon_uv")?, None);

        session.insert_record(
            &Record::new()
                .with("timestamp", 201.0)
                .with("m_water_vx-m/s", 0.2)
                .with("m_gps_lat-lat", 27.2)
                .with("m_gps_lon-lon", -83.0),
        )?;
        assert_eq!(session.get_scalar("time_uv")?, Some(201.0));
        assert_eq!(session.get_scalar("lat_uv")?, Some(27.2));
        assert_eq!(session.get_scalar("lon_uv")?, Some(-83.0));
        Ok(())
    })
    .expect("session");
}

#[test]
fn missing_timestamp_aborts_but_file_is_finalized() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.nc");

    let err = with_session(GliderSession::builder(&path).schema(depth_schema()), |session| {
        session.insert_record(&Record::new().with("timestamp", 10.0).with("depth-m", 2.0))?;
        session.insert_record(&Record::new().with("depth-m", 4.0))?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, Error::MissingTimestamp(_)));

    let file = NcFile::read_only(&path).expect("read");
    assert_eq!(file.dataset().numrecs(), 1);
    assert_eq!(
        file.dataset().attrs.get("depth_max").and_then(|v| v.as_f64()),
        Some(2.0)
    );
}

#[test]
fn unknown_keys_are_skipped() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("unknown.nc");

    let mut session = GliderSession::open(&path, OpenMode::Write).expect("open");
    session
        .insert_record(
            &Record::new()
                .with("timestamp", 1.0)
                .with("sci_mystery-x", 5.0),
        )
        .expect("insert");
    assert_eq!(session.cursor(), 1);
    assert!(matches!(session.resolve("sci_mystery-x"), Err(Error::UnknownDatatype(_))));
    session.close().expect("close");
}

#[test]
fn lazy_descriptors_appear_on_first_use() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("lazy.nc");
    let config = glider_netcdf::WriterConfig {
        lazy_materialize: true,
        ..Default::default()
    };

    let mut session = GliderSession::builder(&path)
        .config(config)
        .schema(depth_schema())
        .open()
        .expect("open");
    assert!(!session.contains("depth"));
    session
        .insert_record(&Record::new().with("timestamp", 1.0).with("depth-m", 2.0))
        .expect("insert");
    assert!(session.contains("depth"));
    assert!(session.contains("depth_qc"));
    let depth = session.dataset().expect("open").variable("depth").expect("depth");
    assert_eq!(depth.dtype, DataType::Double);
    session.close().expect("close");
}

#[test]
fn drop_writes_the_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("dropped.nc");
    {
        let mut session = GliderSession::builder(&path)
            .schema(depth_schema())
            .open()
            .expect("open");
        session
            .insert_record(&Record::new().with("timestamp", 1.0).with("depth-m", 6.0))
            .expect("insert");
    }
    let file = NcFile::read_only(&path).expect("read");
    assert_eq!(file.dataset().numrecs(), 1);
    assert_eq!(file.dataset().attrs.get("depth_min").and_then(|v| v.as_f64()), Some(6.0));
}

#[test]
fn lazy_append_bounds_cover_untouched_variables() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("lazy_append.nc");
    let schema: BTreeMap<String, VariableDescriptor> = serde_json::from_value(json!({
        "a-m": { "name": "a", "type": "f8", "dimension": "time", "global_bound": "vert" },
        "b-m": { "name": "b", "type": "f8", "dimension": "time", "global_bound": "vert" }
    }))
    .expect("schema");
    let config = glider_netcdf::WriterConfig {
        lazy_materialize: true,
        ..Default::default()
    };

    with_session(
        GliderSession::builder(&path)
            .config(config.clone())
            .schema(schema.clone()),
        |session| {
            session.insert_record(
                &Record::new()
                    .with("timestamp", 1.0)
                    .with("a-m", 50.0)
                    .with("b-m", 5.0),
            )
        },
    )
    .expect("first pass");

    with_session(
        GliderSession::builder(&path)
            .mode(OpenMode::Append)
            .config(config)
            .schema(schema),
        |session| session.insert_record(&Record::new().with("timestamp", 2.0).with("b-m", 6.0)),
    )
    .expect("append pass");

    let file = NcFile::read_only(&path).expect("read");
    let attrs = &file.dataset().attrs;
    assert_eq!(attrs.get("vert_min").and_then(|v| v.as_f64()), Some(5.0));
    assert_eq!(attrs.get("vert_max").and_then(|v| v.as_f64()), Some(50.0));
}

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use glider_netcdf::format::{Dataset, NcFile, Variable};

#[derive(Parser)]
#[command(name = "glider-nc-dump", version)]
#[command(about = "Print the header of a glider netCDF file")]
struct Cli {
    /// File to inspect
    path: PathBuf,

    /// Also print the values of this variable (repeatable)
    #[arg(long = "data")]
    data: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let file = NcFile::read_only(&cli.path)
        .with_context(|| format!("failed to open {}", cli.path.display()))?;
    log::info!("read {} records from {}", file.dataset().numrecs(), cli.path.display());

    let mut out = BufWriter::new(io::stdout());
    let name = cli
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dump_header(&mut out, &name, file.dataset())?;
    for var_name in &cli.data {
        let var = file
            .dataset()
            .variable(var_name)
            .with_context(|| format!("no variable `{var_name}`"))?;
        dump_values(&mut out, var)?;
    }
    writeln!(out, "}}")?;
    out.flush()?;
    Ok(())
}

fn dump_header(out: &mut impl Write, name: &str, ds: &Dataset) -> io::Result<()> {
    writeln!(out, "netcdf {name} {{")?;
    writeln!(out, "dimensions:")?;
    for dim in &ds.dims {
        match dim.len {
            Some(len) => writeln!(out, "\t{} = {len} ;", dim.name)?,
            None => writeln!(out, "\t{} = UNLIMITED ; // ({} currently)", dim.name, ds.numrecs())?,
        }
    }
    writeln!(out, "variables:")?;
    for var in &ds.vars {
        let dims = if var.dims.is_empty() {
            String::new()
        } else {
            format!("({})", var.dims.join(", "))
        };
        writeln!(out, "\t{} {}{dims} ;", var.dtype, var.name)?;
        for (attr, value) in var.attrs.iter() {
            writeln!(out, "\t\t{}:{attr} = {value} ;", var.name)?;
        }
    }
    writeln!(out)?;
    writeln!(out, "// global attributes:")?;
    for (attr, value) in ds.attrs.iter() {
        writeln!(out, "\t\t:{attr} = {value} ;")?;
    }
    Ok(())
}

fn dump_values(out: &mut impl Write, var: &Variable) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "data:")?;
    if var.dtype.is_text() {
        let rows: Vec<String> = (0..var.rows())
            .filter_map(|row| var.read_text(row))
            .map(|text| format!("{text:?}"))
            .collect();
        return writeln!(out, " {} = {} ;", var.name, rows.join(", "));
    }
    let values: Vec<String> = (0..var.data.len())
        .filter_map(|i| var.data.get(i))
        .map(|value| {
            if value == var.fill() {
                "_".to_string()
            } else {
                value.to_string()
            }
        })
        .collect();
    writeln!(out, " {} = {} ;", var.name, values.join(", "))
}

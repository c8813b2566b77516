use anyhow::{anyhow, bail, Context, Result};
use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::NcTypeDescriptor;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────
pub const TIME_DIM: &str = "time";
pub const DEFAULT_OUTPUT: &str = "merged_output.nc";

// ─────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────

/// True for names that are one-or-more ASCII digits followed by ".nc".
pub fn is_numeric_nc_name(name: &str) -> bool {
    match name.strip_suffix(".nc") {
        Some(stem) => !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Find all digit-named `*.nc` files directly under `dir`, sorted lexically.
/// Note the sort is on the name as a string, so "10.nc" comes before "2.nc".
/// Subdirectories are ignored even when their names match.
pub fn list_numeric_netcdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut v = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?
    {
        let path = entry?.path();
        let numeric = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, is_numeric_nc_name);
        if numeric && path.is_file() {
            v.push(path);
        }
    }
    v.sort();
    Ok(v)
}

// ─────────────────────────────────────────────────────────────────────
// Schema — shape of the first input, which every other input must match
// ─────────────────────────────────────────────────────────────────────

struct VarSchema {
    name: String,
    dims: Vec<String>,
    shape: Vec<usize>,
    ty: NcVariableType,
    record: bool, // carries the time dimension
}

struct Schema {
    vars: Vec<VarSchema>,
    fixed_dims: Vec<(String, usize)>,
}

/// Only the numeric NetCDF types round-trip through the copy helpers; this
/// rejects char, string, and user-defined variables before any output exists.
fn check_supported(ty: &NcVariableType, name: &str, path: &Path) -> Result<()> {
    match ty {
        NcVariableType::Int(_) | NcVariableType::Float(_) => Ok(()),
        other => bail!(
            "{}: variable '{}': unsupported NetCDF type {:?}",
            path.display(),
            name,
            other
        ),
    }
}

fn build_schema(first: &netcdf::File, path: &Path) -> Result<Schema> {
    if first.dimension(TIME_DIM).is_none() {
        bail!("{}: no '{}' dimension", path.display(), TIME_DIM);
    }

    let mut fixed_dims = Vec::new();
    for d in first.dimensions() {
        if d.name() != TIME_DIM {
            fixed_dims.push((d.name().to_string(), d.len()));
        }
    }

    let mut vars = Vec::new();
    for var in first.variables() {
        let dims: Vec<String> = var
            .dimensions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        let ty = var.vartype();
        check_supported(&ty, &var.name(), path)?;
        let record = dims.iter().any(|d| d == TIME_DIM);
        if record && dims[0] != TIME_DIM {
            bail!(
                "{}: variable '{}' must have '{}' as its leading dimension",
                path.display(),
                var.name(),
                TIME_DIM
            );
        }
        vars.push(VarSchema {
            name: var.name().to_string(),
            shape: var.dimensions().iter().map(|d| d.len()).collect(),
            dims,
            ty,
            record,
        });
    }

    Ok(Schema { vars, fixed_dims })
}

/// Check one input against the schema; returns its time length.
fn validate_against(schema: &Schema, file: &netcdf::File, path: &Path) -> Result<usize> {
    let time_len = file
        .dimension(TIME_DIM)
        .ok_or_else(|| anyhow!("{}: no '{}' dimension", path.display(), TIME_DIM))?
        .len();

    let nvars = file.variables().count();
    if nvars != schema.vars.len() {
        bail!(
            "{}: expected {} variables, found {}",
            path.display(),
            schema.vars.len(),
            nvars
        );
    }

    for vs in &schema.vars {
        let var = file
            .variable(&vs.name)
            .ok_or_else(|| anyhow!("{}: missing variable '{}'", path.display(), vs.name))?;
        if var.vartype() != vs.ty {
            bail!(
                "{}: variable '{}' has a different type than the first input",
                path.display(),
                vs.name
            );
        }
        let dims: Vec<String> = var
            .dimensions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        if dims != vs.dims {
            bail!(
                "{}: variable '{}' has dimensions {:?}, expected {:?}",
                path.display(),
                vs.name,
                dims,
                vs.dims
            );
        }
        for (d, expect) in var.dimensions().iter().zip(&vs.shape) {
            if d.name() == TIME_DIM {
                continue;
            }
            if d.len() != *expect {
                bail!(
                    "{}: dimension '{}' of variable '{}' is {}, expected {}",
                    path.display(),
                    d.name(),
                    vs.name,
                    d.len(),
                    expect
                );
            }
        }
    }

    Ok(time_len)
}

// ─────────────────────────────────────────────────────────────────────
// Typed copy helpers — libnetcdf does the actual encode/decode
// ─────────────────────────────────────────────────────────────────────

/// Dispatch a generic helper over the numeric NetCDF types. Char, string,
/// and user-defined types are rejected.
macro_rules! dispatch_numeric {
    ($ty:expr, $name:expr, $generic:ident ( $($arg:expr),* )) => {
        match $ty {
            NcVariableType::Int(IntType::I8)      => $generic::<i8>($($arg),*),
            NcVariableType::Int(IntType::U8)      => $generic::<u8>($($arg),*),
            NcVariableType::Int(IntType::I16)     => $generic::<i16>($($arg),*),
            NcVariableType::Int(IntType::U16)     => $generic::<u16>($($arg),*),
            NcVariableType::Int(IntType::I32)     => $generic::<i32>($($arg),*),
            NcVariableType::Int(IntType::U32)     => $generic::<u32>($($arg),*),
            NcVariableType::Int(IntType::I64)     => $generic::<i64>($($arg),*),
            NcVariableType::Int(IntType::U64)     => $generic::<u64>($($arg),*),
            NcVariableType::Float(FloatType::F32) => $generic::<f32>($($arg),*),
            NcVariableType::Float(FloatType::F64) => $generic::<f64>($($arg),*),
            other => bail!("variable '{}': unsupported NetCDF type {:?}", $name, other),
        }
    };
}

/// Define one output variable, carrying over the fill value and attributes
/// of its counterpart in the first input.
fn def_var<T: NcTypeDescriptor + Copy>(
    out: &mut netcdf::FileMut,
    name: &str,
    dims: &[&str],
    src: &netcdf::Variable,
) -> Result<()> {
    let mut var = out.add_variable::<T>(name, dims)?;
    if let Some(fill) = src.fill_value::<T>()? {
        var.set_fill_value(fill)?;
    }
    for attr in src.attributes() {
        if attr.name() == "_FillValue" {
            continue; // handled via set_fill_value while still in define mode
        }
        var.put_attribute(attr.name(), attr.value()?)?;
    }
    Ok(())
}

/// Append one input's records at `start` along the unlimited dimension.
fn append_slab<T: NcTypeDescriptor + Copy>(
    src: &netcdf::Variable,
    dst: &mut netcdf::VariableMut,
    start: &[usize],
    count: &[usize],
) -> Result<()> {
    let values = src.get_values::<T, _>(..)?;
    dst.put_values(&values, (start, count))?;
    Ok(())
}

/// Copy a variable that does not use the time dimension, in one shot.
fn copy_whole<T: NcTypeDescriptor + Copy>(
    src: &netcdf::Variable,
    dst: &mut netcdf::VariableMut,
) -> Result<()> {
    let values = src.get_values::<T, _>(..)?;
    dst.put_values(&values, ..)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Concatenation
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ConcatSummary {
    pub files: usize,
    pub time_len: usize,
    pub output: PathBuf,
}

/// Open every input, validate them against the first one, and write the
/// concatenated result to `output`.
///
/// Validation finishes before the output file is touched, so a mismatched
/// input never creates or truncates the result. All opened handles are
/// released on both the success and the error path when `datasets` drops.
pub fn concat_along_time(paths: &[PathBuf], output: &Path) -> Result<ConcatSummary> {
    if paths.is_empty() {
        bail!("no input files given");
    }

    // Open everything up front, in discovery order.
    let mut datasets = Vec::with_capacity(paths.len());
    for p in paths {
        let f = netcdf::open(p).with_context(|| format!("opening {}", p.display()))?;
        datasets.push(f);
    }

    let schema = build_schema(&datasets[0], &paths[0])?;
    let mut time_lens = Vec::with_capacity(datasets.len());
    for (f, p) in datasets.iter().zip(paths) {
        time_lens.push(validate_against(&schema, f, p)?);
    }

    // Define the output container. A stale result is silently replaced.
    let _ = std::fs::remove_file(output);
    let mut out =
        netcdf::create(output).with_context(|| format!("creating {}", output.display()))?;
    out.add_unlimited_dimension(TIME_DIM)?;
    for (name, len) in &schema.fixed_dims {
        out.add_dimension(name, *len)?;
    }
    for attr in datasets[0].attributes() {
        out.add_attribute(attr.name(), attr.value()?)?;
    }
    for vs in &schema.vars {
        let dims: Vec<&str> = vs.dims.iter().map(String::as_str).collect();
        let src = datasets[0].variable(&vs.name).unwrap();
        dispatch_numeric!(&vs.ty, vs.name, def_var(&mut out, &vs.name, &dims, &src))?;
    }

    // Variables without a time axis come from the first input only.
    for vs in schema.vars.iter().filter(|v| !v.record) {
        let src = datasets[0].variable(&vs.name).unwrap();
        let mut dst = out.variable_mut(&vs.name).unwrap();
        dispatch_numeric!(&vs.ty, vs.name, copy_whole(&src, &mut dst))?;
    }

    // Record variables: each input's slab lands at the running time offset,
    // so file N's records precede file N+1's.
    let mut offset = 0usize;
    for ((f, p), n) in datasets.iter().zip(paths).zip(&time_lens) {
        if *n > 0 {
            for vs in schema.vars.iter().filter(|v| v.record) {
                let src = f
                    .variable(&vs.name)
                    .ok_or_else(|| anyhow!("{}: missing variable '{}'", p.display(), vs.name))?;
                let count: Vec<usize> = src.dimensions().iter().map(|d| d.len()).collect();
                let mut start = vec![0usize; count.len()];
                start[0] = offset;
                let mut dst = out.variable_mut(&vs.name).unwrap();
                dispatch_numeric!(&vs.ty, vs.name, append_slab(&src, &mut dst, &start, &count))?;
            }
        }
        offset += n;
    }

    drop(out);

    Ok(ConcatSummary {
        files: datasets.len(),
        time_len: offset,
        output: output.to_path_buf(),
    })
}

// ─────────────────────────────────────────────────────────────────────
// Orchestration
// ─────────────────────────────────────────────────────────────────────

/// Scan `folder_path` for digit-named NetCDF files, concatenate them along
/// the time dimension, and write `<folder_path>/<output_file>`.
///
/// Failures in the open/validate/write pipeline are reported as a single
/// console line and swallowed; the caller's exit code is unaffected. Open
/// dataset handles are released on every exit path, including a failure
/// part-way through the pipeline.
pub fn run(folder_path: &Path, output_file: &str) {
    let files = match list_numeric_netcdfs(folder_path) {
        Ok(files) => files,
        Err(e) => {
            println!("Error during concatenation: {e:#}");
            return;
        }
    };

    if files.is_empty() {
        println!("No matching NetCDF files found in the directory.");
        return;
    }
    println!("Found {} NetCDF files. Concatenating...", files.len());

    let output = folder_path.join(output_file);
    match concat_along_time(&files, &output) {
        Ok(summary) => println!(
            "Successfully saved concatenated NetCDF as {}",
            summary.output.display()
        ),
        Err(e) => println!("Error during concatenation: {e:#}"),
    }
}

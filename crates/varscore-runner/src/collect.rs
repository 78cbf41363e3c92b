use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use varscore_core::scores::{read_scores, ScoreHeader, ScoresError, ScoresFile, ScoresWriter};
use varscore_core::{Error, Result, RunConfiguration};

#[derive(Debug)]
pub struct MergeReport {
    pub merged_path: PathBuf,
    pub shards: u32,
    pub records: usize,
}

pub(crate) fn load_shard(config: &RunConfiguration, shard: u32) -> Result<ScoresFile> {
    let path = config.shard_result_path(shard);
    match read_scores(&path) {
        Ok(file) => Ok(file),
        Err(ScoresError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::MissingShardResult { shard, path })
        }
        Err(ScoresError::Invalid(reason)) => Err(Error::CorruptShardResult {
            shard,
            path,
            reason,
        }),
        Err(ScoresError::Io(e)) => Err(e.into()),
    }
}

fn header_mismatch_reason(found: &ScoreHeader, expected: &ScoreHeader) -> String {
    format!(
        "header does not match shard 0 ({} target(s)/{} stat(s) vs {} target(s)/{} stat(s))",
        found.targets.len(),
        found.stats.len(),
        expected.targets.len(),
        expected.stats.len()
    )
}

fn append_records(
    writer: &mut ScoresWriter<Vec<u8>>,
    file: &ScoresFile,
    shard: u32,
    path: &Path,
) -> Result<()> {
    for record in &file.records {
        writer.write_record(record).map_err(|e| match e {
            ScoresError::Io(e) => Error::Io(e),
            ScoresError::Invalid(reason) => Error::CorruptShardResult {
                shard,
                path: path.to_path_buf(),
                reason,
            },
        })?;
    }
    Ok(())
}

/// Merge every shard's result file into the final output, in shard
/// index order. Each shard is re-validated on the way in and required
/// to carry shard 0's header; the merged file is verified before it is
/// renamed into place, so the final path either holds a complete merge
/// or nothing.
pub fn collect_scores(config: &RunConfiguration) -> Result<MergeReport> {
    config.validate()?;
    let merged_path = config.merged_path();

    let first_path = config.shard_result_path(0);
    let first = load_shard(config, 0)?;
    let header = first.header.clone();
    let mut writer = ScoresWriter::new(Vec::new(), &header).map_err(|e| match e {
        ScoresError::Io(e) => Error::Io(e),
        ScoresError::Invalid(reason) => Error::CorruptShardResult {
            shard: 0,
            path: first_path.clone(),
            reason,
        },
    })?;
    append_records(&mut writer, &first, 0, &first_path)?;

    for shard in 1..config.total_shards {
        let path = config.shard_result_path(shard);
        let file = load_shard(config, shard)?;
        if file.header != header {
            return Err(Error::CorruptShardResult {
                shard,
                path,
                reason: header_mismatch_reason(&file.header, &header),
            });
        }
        append_records(&mut writer, &file, shard, &path)?;
    }

    let records = writer.records_written();
    let bytes = writer.finish().map_err(|e| match e {
        ScoresError::Io(e) => Error::Io(e),
        ScoresError::Invalid(reason) => Error::Invariant(reason),
    })?;

    let tmp = merged_path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        config.result_filename,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let swapped = write_and_swap(&tmp, &merged_path, &bytes, records);
    if swapped.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    swapped?;

    tracing::info!(
        path = %merged_path.display(),
        shards = config.total_shards,
        records,
        "merged scores written"
    );
    Ok(MergeReport {
        merged_path,
        shards: config.total_shards,
        records,
    })
}

fn write_and_swap(tmp: &Path, final_path: &Path, bytes: &[u8], expected_records: usize) -> Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    // read the temp file back before publishing it
    let reread = read_scores(tmp).map_err(|e| match e {
        ScoresError::Io(e) => Error::Io(e),
        ScoresError::Invalid(reason) => Error::Invariant(format!(
            "merged output failed validation before publish: {}",
            reason
        )),
    })?;
    if reread.records.len() != expected_records {
        return Err(Error::Invariant(format!(
            "merged output holds {} record(s), expected {}",
            reread.records.len(),
            expected_records
        )));
    }

    fs::rename(tmp, final_path)?;
    if let Some(parent) = final_path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Standalone reconciliation against an existing run directory.
pub fn merge(out_dir: &Path) -> Result<MergeReport> {
    let mut config = RunConfiguration::load_snapshot(out_dir)?;
    config.out_dir = out_dir.to_path_buf();
    collect_scores(&config)
}

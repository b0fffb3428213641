//! Main entry point for the zipkit CLI application.
//!
//! This binary provides an unzip-style command-line interface for listing,
//! testing and extracting ZIP files, plus adding and deleting entries.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use zipkit::zip::names::transform_name;
use zipkit::{
    AddOptions, ArchiveStorage, Cli, CompressionLevel, TestOptions, TestStrategy, UpdateMode,
    ZipArchive, ZipEntry, ZipExtractor,
};

/// Updates win over tests, tests over listing and extraction.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.is_update() {
        return update_archive(&cli);
    }

    let archive =
        ZipArchive::open_file(&cli.file).with_context(|| format!("cannot open {}", cli.file))?;
    if cli.test {
        return test_archive(&archive, &cli);
    }
    process_zip(&archive, &cli)
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`, `info` with -v).
fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// List (`-l`, `-v`) or extract the selected entries.
fn process_zip(archive: &ZipArchive, cli: &Cli) -> Result<()> {
    let extractor = ZipExtractor::new(archive);
    if cli.list || cli.verbose {
        list_files(&extractor, cli.verbose);
        return Ok(());
    }

    let selected: Vec<ZipEntry> = extractor
        .list_files()
        .into_iter()
        .filter(|entry| is_selected(entry, cli))
        .collect();
    let banner = cli.pipe && selected.len() > 1;
    for entry in &selected {
        extract_file(&extractor, entry, cli, banner)?;
    }
    Ok(())
}

/// Directories only matter when whole trees go to disk. Files must match
/// a positional selection, if any, and no `-x` pattern.
fn is_selected(entry: &ZipEntry, cli: &Cli) -> bool {
    let name = entry.name();
    if entry.is_directory() {
        return !cli.pipe && !cli.junk_paths && cli.files.is_empty();
    }
    let wanted = cli.files.is_empty() || cli.files.iter().any(|f| name_matches(f, name));
    wanted
        && !cli
            .exclude
            .iter()
            .any(|x| name.contains(x.as_str()) || glob_match(x, name))
}

/// Positional selections match the full name or the base name; patterns
/// with wildcards are matched against the full name.
fn name_matches(selection: &str, name: &str) -> bool {
    if has_glob_chars(selection) {
        glob_match(selection, name)
    } else {
        let basename = name.rsplit('/').next().unwrap_or(name);
        name == selection || basename == selection
    }
}

/// Names only with `-l`; with `-v` a table of sizes, savings and
/// modification times followed by totals over the files.
fn list_files(extractor: &ZipExtractor<'_, zipkit::ArchiveFile>, verbose: bool) {
    let entries = extractor.list_files();
    if !verbose {
        for entry in &entries {
            println!("{}", entry.name());
        }
        return;
    }

    const RULE: &str = "----------  ----------  -----  ----------  -----  ----";
    println!("    Length        Size   Cmpr        Date   Time  Name");
    println!("{RULE}");
    let (mut size, mut packed, mut files) = (0u64, 0u64, 0usize);
    for entry in &entries {
        let t = entry.date_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.size(),
            entry.compressed_size(),
            ratio(entry.compressed_size(), entry.size()),
            t.year,
            t.month,
            t.day,
            t.hour,
            t.minute,
            entry.name()
        );
        if entry.is_file() {
            size += entry.size();
            packed += entry.compressed_size();
            files += 1;
        }
    }
    println!("{RULE}");
    println!(
        "{size:>10}  {packed:>10}  {}                     {files} file{}",
        ratio(packed, size),
        if files == 1 { "" } else { "s" }
    );
}

/// Space saved, as a right-aligned percentage.
fn ratio(compressed: u64, size: u64) -> String {
    if size > 0 {
        format!("{:>4}%", 100u64.saturating_sub(compressed.saturating_mul(100) / size))
    } else {
        "  0%".to_string()
    }
}

/// Write one entry to stdout (`-p`) or under `-d` (default `.`).
/// Existing files are kept unless `-o` is given; `banner` prefixes piped
/// data with the entry name.
fn extract_file(
    extractor: &ZipExtractor<'_, zipkit::ArchiveFile>,
    entry: &ZipEntry,
    cli: &Cli,
    banner: bool,
) -> Result<()> {
    if cli.pipe {
        if banner {
            println!("--- {} ---", entry.name());
        }
        extractor.extract_to_stdout(entry)?;
        return Ok(());
    }

    let dest = Path::new(cli.extract_dir.as_deref().unwrap_or("."));
    let target = extractor.output_path(entry, dest, cli.junk_paths)?;
    if entry.is_file() && target.exists() && (cli.never_overwrite || !cli.overwrite) {
        if !cli.is_quiet() {
            let hint = if cli.never_overwrite { "file exists" } else { "use -o to overwrite" };
            eprintln!("Skipping: {} ({hint})", entry.name());
        }
        return Ok(());
    }

    if !cli.is_quiet() {
        let verb = if entry.is_directory() { "creating" } else { "extracting" };
        println!("{verb:>12}: {}", entry.name());
    }
    extractor
        .extract_to_file(entry, dest, cli.junk_paths)
        .with_context(|| format!("failed to extract {}", entry.name()))?;
    Ok(())
}

/// Test every entry (`-t`), stopping at the first damaged one unless
/// `--all-errors` is given.
fn test_archive(archive: &ZipArchive, cli: &Cli) -> Result<()> {
    let strategy = if cli.all_errors {
        TestStrategy::FindAllErrors
    } else {
        TestStrategy::FindFirstError
    };
    let report = archive.test_archive(TestOptions {
        test_data: true,
        strategy,
    })?;

    for problem in &report.problems {
        eprintln!("  {}: {}", problem.entry, problem.error);
    }
    if !report.is_ok() {
        bail!(
            "{} damaged {} found in {}",
            report.problems.len(),
            if report.problems.len() == 1 { "entry" } else { "entries" },
            cli.file
        );
    }
    if !cli.is_very_quiet() {
        println!(
            "No errors detected in compressed data of {} ({} entries tested).",
            cli.file, report.entries_tested
        );
    }
    Ok(())
}

/// Apply -D, -a and -z in one update.
fn update_archive(cli: &Cli) -> Result<()> {
    let path = Path::new(&cli.file);
    let mut archive = if path.exists() {
        ZipArchive::open_file(path).with_context(|| format!("cannot open {}", cli.file))?
    } else if !cli.add.is_empty() {
        ZipArchive::create_file(path).with_context(|| format!("cannot create {}", cli.file))?
    } else {
        bail!("{} does not exist", cli.file);
    };

    if let Some(level) = cli.level {
        archive.settings_mut().default_level = CompressionLevel::new(level)?;
    }
    let mode = if cli.direct {
        UpdateMode::Direct
    } else {
        UpdateMode::Safe
    };
    archive.begin_update_with(ArchiveStorage::disk(mode))?;

    for selection in &cli.delete {
        let names: Vec<String> = if has_glob_chars(selection) {
            archive
                .entries()
                .iter()
                .filter(|e| glob_match(selection, e.name()))
                .map(|e| e.name().to_string())
                .collect()
        } else {
            vec![selection.clone()]
        };
        if names.is_empty() {
            bail!("no entries match {selection}");
        }
        for name in names {
            archive
                .delete(&name)
                .with_context(|| format!("cannot delete {name}"))?;
            if !cli.is_quiet() {
                println!("   deleting: {name}");
            }
        }
    }

    for file in &cli.add {
        add_path(&mut archive, Path::new(file), cli)?;
    }

    if let Some(comment) = &cli.comment {
        archive.set_comment(comment.clone())?;
    }

    archive.commit().context("commit failed")?;
    if !cli.is_quiet() {
        let len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("{}: {} entries, {}", cli.file, archive.len(), format_size(len));
    }
    Ok(())
}

/// Stage a file, or a directory and everything below it.
fn add_path(archive: &mut ZipArchive, path: &Path, cli: &Cli) -> Result<()> {
    let name = path.to_string_lossy().to_string();
    if path.is_dir() {
        if !transform_name(&name).is_empty() {
            archive.add(AddOptions::directory(name.as_str()))?;
        }
        let mut children: Vec<_> = fs::read_dir(path)
            .with_context(|| format!("cannot read {}", path.display()))?
            .collect::<std::io::Result<_>>()?;
        children.sort_by_key(|c| c.file_name());
        for child in children {
            add_path(archive, &child.path(), cli)?;
        }
    } else {
        archive
            .add(AddOptions::file(name.as_str(), path))
            .with_context(|| format!("cannot add {}", path.display()))?;
    }
    if !cli.is_quiet() {
        println!("     adding: {name}");
    }
    Ok(())
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// `*` matches any run of characters (including `/`), `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // Position after the last `*` and the text index it is matched up to
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p + 1, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((after, matched)) => {
                    p = after;
                    t = matched + 1;
                    star = Some((after, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

fn format_size(size: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];
    UNITS
        .iter()
        .find(|&&(_, scale)| size >= scale)
        .map(|&(unit, scale)| format!("{:.2} {unit}", size as f64 / scale as f64))
        .unwrap_or_else(|| format!("{size} bytes"))
}

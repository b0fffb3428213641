use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipkit")]
#[command(version)]
#[command(about = "List, test, extract and update ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipkit data1.zip -x joe        extract all files except joe from data1.zip\n  \
  zipkit -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  zipkit -t --all-errors a.zip   test every entry and report all problems\n  \
  zipkit a.zip -a notes.txt      add notes.txt, creating a.zip if needed\n  \
  zipkit a.zip -D old.txt        delete old.txt from a.zip")]
pub struct Cli {
    /// Archive to read or update
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Entries to extract; names, base names or `*`/`?` patterns (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List entry names
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries with sizes and dates; also raises the log level
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write entry data to stdout with no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract under DIR instead of the current directory
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Skip entries matching these names or patterns
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Keep existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Replace existing files
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Drop directory components from extracted names
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Fewer messages; -qq for none
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Verify every entry's headers and CRC
    #[arg(short = 't')]
    pub test: bool,

    /// With -t, report every damaged entry instead of stopping at the first
    #[arg(long = "all-errors", requires = "test")]
    pub all_errors: bool,

    /// Add files to the archive (created when missing)
    #[arg(short = 'a', value_name = "PATH", num_args = 1..)]
    pub add: Vec<String>,

    /// Delete entries from the archive
    #[arg(short = 'D', value_name = "NAME", num_args = 1..)]
    pub delete: Vec<String>,

    /// Compression level for added files (0-9)
    #[arg(short = 'L', value_name = "LEVEL", value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: Option<u32>,

    /// Set the archive comment
    #[arg(short = 'z', value_name = "COMMENT")]
    pub comment: Option<String>,

    /// Rewrite the archive in place instead of through a temporary file
    #[arg(long = "direct")]
    pub direct: bool,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Whether the archive is changed rather than read.
    pub fn is_update(&self) -> bool {
        !self.add.is_empty() || !self.delete.is_empty() || self.comment.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_flags() {
        let cli = Cli::parse_from(["zipkit", "a.zip", "-a", "x.txt", "y.txt", "-L", "9", "--direct"]);
        assert_eq!(cli.add, ["x.txt", "y.txt"]);
        assert_eq!(cli.level, Some(9));
        assert!(cli.direct);
        assert!(cli.is_update());
    }

    #[test]
    fn test_level_out_of_range() {
        assert!(Cli::try_parse_from(["zipkit", "a.zip", "-L", "10"]).is_err());
    }

    #[test]
    fn test_all_errors_requires_test() {
        assert!(Cli::try_parse_from(["zipkit", "a.zip", "--all-errors"]).is_err());
        let cli = Cli::parse_from(["zipkit", "-t", "--all-errors", "a.zip"]);
        assert!(cli.test && cli.all_errors);
    }
}

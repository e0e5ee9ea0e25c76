//! Tar command: compress (plain or `find`-matched) and extract modes.

use crate::shell::shell_quote;

pub enum TarCommand {
    /// Simple compress form: `tar -czvf target -C source_dir source_file`.
    Compress {
        source_dir: String,
        source_file: String,
        target: String,
        dereference: bool,
    },
    /// Compress form driven by a `find` match pattern, piped into `tar`
    /// so recorded names stay relative to `source_dir`.
    CompressMatching {
        source_dir: String,
        match_pattern: String,
        target: String,
    },
    Extract {
        source: String,
        target_dir: String,
    },
}

const TAR_TIMEOUT_SECS: u64 = 5;

impl TarCommand {
    pub fn render_command_line(&self) -> String {
        match self {
            TarCommand::Compress {
                source_dir,
                source_file,
                target,
                dereference,
            } => {
                let deref_flag = if *dereference { "--dereference " } else { "" };
                format!(
                    "timeout {TAR_TIMEOUT_SECS} tar {deref_flag}-czvf {} -C {} {}",
                    shell_quote(target),
                    shell_quote(source_dir),
                    shell_quote(source_file),
                )
            }
            TarCommand::CompressMatching {
                source_dir,
                match_pattern,
                target,
            } => {
                let inner = format!(
                    "cd {} && find . -name {} -print0 | tar --null --files-from - -czf {}",
                    shell_quote(source_dir),
                    shell_quote(match_pattern),
                    shell_quote(target),
                );
                format!("timeout {TAR_TIMEOUT_SECS} bash -c {}", shell_quote(&inner))
            }
            TarCommand::Extract { source, target_dir } => format!(
                "timeout {TAR_TIMEOUT_SECS} tar -xzf {} -C {}",
                shell_quote(source),
                shell_quote(target_dir),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_compress_uses_dirname_basename_split() {
        let cmd = TarCommand::Compress {
            source_dir: "/home/u".into(),
            source_file: "data".into(),
            target: "/home/u/out.tar.gz".into(),
            dereference: false,
        };
        let line = cmd.render_command_line();
        assert!(line.contains("-C '/home/u'"));
        assert!(line.contains("'data'"));
        assert!(!line.contains("--dereference"));
    }

    #[test]
    fn matching_compress_uses_find_pipe_tar_inside_bash_c() {
        let cmd = TarCommand::CompressMatching {
            source_dir: "/home/u".into(),
            match_pattern: "*.log".into(),
            target: "/home/u/logs.tar.gz".into(),
        };
        let line = cmd.render_command_line();
        assert!(line.contains("bash -c"));
        assert!(line.contains("find . -name"));
        assert!(line.contains("--null --files-from -"));
    }

    #[test]
    fn extract_uses_dash_c_dst() {
        let cmd = TarCommand::Extract {
            source: "/home/u/a.tar.gz".into(),
            target_dir: "/home/u/out".into(),
        };
        assert_eq!(
            cmd.render_command_line(),
            "timeout 5 tar -xzf '/home/u/a.tar.gz' -C '/home/u/out'"
        );
    }
}

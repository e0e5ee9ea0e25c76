//! `ls -l` command: render + parse, including recursive sections, C-quoted
//! filenames, and `name -> target` symlink syntax.

use model::ErrorKind;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::shell::{map_error, shell_quote, with_timeout, UTILITY_TIMEOUT_SECS};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct File {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: char,
    pub link_target: Option<String>,
    pub user: String,
    pub group: String,
    pub permissions: String,
    pub last_modified: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    /// The non-recursive form: returns the directory's own entry.
    None,
    /// `-R`: flat per-section listing, with names prefixed by their
    /// relative sub-path.
    Recursive,
}

pub struct LsCommand {
    pub path: String,
    pub recursion: Recursion,
    pub show_hidden: bool,
    pub numeric_uid_gid: bool,
    pub dereference: bool,
}

#[derive(Debug)]
pub enum LsOutput {
    Single(Option<File>),
    Listing(Vec<File>),
}

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<type>\S)(?P<permissions>\S+)\s+\d+\s+(?P<user>\S+)\s+(?P<group>\S+)\s+(?P<size>\d+)\s+(?P<last_modified>(?:\d|-|T|:)+)\s+(?P<filename>.+)$",
    )
    .expect("static regex")
});

static SECTION_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"(.+)":$"#).expect("static regex")
});

impl LsCommand {
    pub fn render_command_line(&self) -> String {
        let mut flags = vec![
            "-l".to_string(),
            "--quoting-style=c".to_string(),
            "--time-style='+%Y-%m-%dT%H:%M:%S'".to_string(),
        ];
        if self.show_hidden {
            flags.push("-A".to_string());
        }
        if self.numeric_uid_gid {
            flags.push("--numeric-uid-gid".to_string());
        }
        if self.recursion == Recursion::None {
            flags.push("-d".to_string());
        }
        if self.recursion == Recursion::Recursive {
            flags.push("-R".to_string());
        }
        if self.dereference {
            flags.push("-L".to_string());
        }
        let cmd = format!("ls {} -- {}", flags.join(" "), shell_quote(&self.path));
        with_timeout(UTILITY_TIMEOUT_SECS, &cmd)
    }

    pub fn parse_output(&self, stdout: &str, stderr: &str, exit_status: i32) -> Result<LsOutput, ErrorKind> {
        if exit_status != 0 {
            return Err(map_error(stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr.to_string())));
        }

        let file_list = parse_ls_sections(stdout);

        match self.recursion {
            Recursion::None => Ok(LsOutput::Single(file_list.into_iter().next())),
            Recursion::Recursive => Ok(LsOutput::Listing(file_list)),
        }
    }
}

/// Splits recursive `ls -R` output into `"section":` headers plus bodies,
/// computing each entry's name relative to the implicit root section, then
/// delegates to `parse_folder` per section. Non-recursive output is a single
/// implicit section.
fn parse_ls_sections(stdout: &str) -> Vec<File> {
    let mut sections: Vec<(Option<String>, Vec<&str>)> = Vec::new();
    let mut current_header: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut root_prefix: Option<String> = None;

    for line in stdout.lines() {
        if let Some(caps) = SECTION_HEADER_RE.captures(line) {
            if current_header.is_some() || !current_lines.is_empty() {
                sections.push((current_header.take(), std::mem::take(&mut current_lines)));
            }
            let header = caps[1].to_string();
            if root_prefix.is_none() {
                root_prefix = Some(header.clone());
            }
            current_header = Some(header);
            continue;
        }
        if line == "total" || line.starts_with("total ") {
            continue;
        }
        if !line.trim().is_empty() {
            current_lines.push(line);
        }
    }
    sections.push((current_header.take(), current_lines));

    let mut out = Vec::new();
    for (header, lines) in sections {
        let prefix = match (&header, &root_prefix) {
            (Some(h), Some(root)) if h != root => {
                h.strip_prefix(&format!("{root}/")).map(|s| s.to_string())
            }
            _ => None,
        };
        for entry in parse_folder(&lines) {
            match &prefix {
                Some(p) => {
                    let mut entry = entry;
                    entry.name = format!("{p}/{}", entry.name);
                    out.push(entry);
                }
                None => out.push(entry),
            }
        }
    }
    out
}

fn parse_folder(lines: &[&str]) -> Vec<File> {
    let mut out = Vec::new();
    for line in lines {
        let Some(caps) = LINE_RE.captures(line) else {
            continue;
        };
        let filename_field = &caps["filename"];
        let tokens = shlex::split(filename_field).unwrap_or_else(|| vec![filename_field.to_string()]);

        let (name, link_target) = if tokens.len() == 3 && tokens[1] == "->" {
            (tokens[0].clone(), Some(tokens[2].clone()))
        } else {
            (filename_field.to_string(), None)
        };

        out.push(File {
            name,
            file_type: caps["type"].chars().next().unwrap_or('-'),
            link_target,
            user: caps["user"].to_string(),
            group: caps["group"].to_string(),
            permissions: caps["permissions"].to_string(),
            last_modified: caps["last_modified"].to_string(),
            size: caps["size"].parse().unwrap_or(0),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_entry_mode_with_d_flag() {
        let cmd = LsCommand {
            path: "/home/u".into(),
            recursion: Recursion::None,
            show_hidden: false,
            numeric_uid_gid: false,
            dereference: false,
        };
        let line = cmd.render_command_line();
        assert!(line.contains("-d"));
        assert!(line.contains("'/home/u'"));
        assert!(line.starts_with("timeout 5 "));
    }

    #[test]
    fn parses_two_entry_directory_with_symlink() {
        let cmd = LsCommand {
            path: "/home/u".into(),
            recursion: Recursion::Recursive,
            show_hidden: false,
            numeric_uid_gid: false,
            dereference: false,
        };
        let stdout = "total 0\n\
-rw-r--r-- 1 u g 0 2024-01-02T03:04:05 \"a.txt\"\n\
lrwxrwxrwx 1 u g 0 2024-01-02T03:04:05 \"b\" -> \"a.txt\"\n";
        let LsOutput::Listing(files) = cmd.parse_output(stdout, "", 0).unwrap() else {
            panic!("expected listing");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].file_type, '-');
        assert_eq!(files[0].link_target, None);
        assert_eq!(files[1].name, "b");
        assert_eq!(files[1].file_type, 'l');
        assert_eq!(files[1].link_target.as_deref(), Some("a.txt"));
    }

    #[test]
    fn non_recursion_returns_own_entry_or_none() {
        let cmd = LsCommand {
            path: "/home/u".into(),
            recursion: Recursion::None,
            show_hidden: false,
            numeric_uid_gid: false,
            dereference: false,
        };
        let stdout = "-rw-r--r-- 1 u g 0 2024-01-02T03:04:05 \"u\"\n";
        let LsOutput::Single(file) = cmd.parse_output(stdout, "", 0).unwrap() else {
            panic!("expected single");
        };
        assert_eq!(file.unwrap().name, "u");
    }

    #[test]
    fn nonzero_exit_maps_to_error_kind() {
        let cmd = LsCommand {
            path: "/missing".into(),
            recursion: Recursion::None,
            show_hidden: false,
            numeric_uid_gid: false,
            dereference: false,
        };
        let err = cmd
            .parse_output("", "ls: cannot access 'x': No such file or directory", 2)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
    }
}

//! Plain `format!`-based shell script rendering. The teacher never reaches
//! for a template engine and these scripts are short, so hand-built strings
//! stay more idiomatic than adding a new dependency.

use commands::shell::shell_quote;

/// Polls `head_url` until the upload completes, then streams the object to
/// `target_path` in chunks of `max_part_size` bytes via HTTP range requests.
pub fn render_ingress_script(get_url: &str, head_url: &str, target_path: &str, max_part_size: u64) -> String {
    format!(
        r#"#!/bin/bash
set -euo pipefail

HEAD_URL={head_url}
GET_URL={get_url}
TARGET={target}
CHUNK_SIZE={max_part_size}

until curl -sf -o /dev/null "$HEAD_URL"; do
  sleep 2
done

SIZE=$(curl -sfI "$HEAD_URL" | grep -i '^content-length:' | tr -d '\r' | awk '{{print $2}}')
OFFSET=0
: > "$TARGET"
while [ "$OFFSET" -lt "$SIZE" ]; do
  END=$((OFFSET + CHUNK_SIZE - 1))
  if [ "$END" -ge "$SIZE" ]; then
    END=$((SIZE - 1))
  fi
  curl -sf -r "${{OFFSET}}-${{END}}" "$GET_URL" >> "$TARGET"
  OFFSET=$((END + 1))
done
"#,
        head_url = shell_quote(head_url),
        get_url = shell_quote(get_url),
        target = shell_quote(target_path),
        max_part_size = max_part_size,
    )
}

/// Splits `source_path` into parts sized `part_size` and PUTs each to its
/// presigned `upload_part` URL with `concurrency` parallel workers, then
/// hits `complete_url` to finish the multipart upload.
pub fn render_egress_script(
    source_path: &str,
    part_urls: &[String],
    complete_url: &str,
    part_size: u64,
    concurrency: usize,
) -> String {
    let mut urls_array = String::new();
    for (idx, url) in part_urls.iter().enumerate() {
        urls_array.push_str(&format!("PART_URLS[{idx}]={}\n", shell_quote(url)));
    }

    format!(
        r#"#!/bin/bash
set -euo pipefail

SOURCE={source}
PART_SIZE={part_size}
PARTS_DIR=$(mktemp -d)
declare -a PART_URLS
{urls_array}
split -b "$PART_SIZE" -d -a 5 "$SOURCE" "$PARTS_DIR/part."

i=0
for part in "$PARTS_DIR"/part.*; do
  url="${{PART_URLS[$i]}}"
  curl -sf -T "$part" "$url" &
  i=$((i + 1))
  if [ "$(jobs -r | wc -l)" -ge {concurrency} ]; then
    wait -n
  fi
done
wait

curl -sf -X POST "{complete_url}" >/dev/null
rm -rf "$PARTS_DIR"
"#,
        source = shell_quote(source_path),
        part_size = part_size,
        urls_array = urls_array,
        concurrency = concurrency,
        complete_url = complete_url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_script_embeds_urls_and_target() {
        let script = render_ingress_script("https://get", "https://head", "/home/u/f", 1024);
        assert!(script.contains("'https://get'"));
        assert!(script.contains("'https://head'"));
        assert!(script.contains("'/home/u/f'"));
        assert!(script.contains("CHUNK_SIZE=1024"));
    }

    #[test]
    fn egress_script_declares_one_entry_per_part_url() {
        let urls = vec!["https://a".to_string(), "https://b".to_string()];
        let script = render_egress_script("/home/u/f", &urls, "https://complete", 2_000_000_000, 4);
        assert!(script.contains("PART_URLS[0]='https://a'"));
        assert!(script.contains("PART_URLS[1]='https://b'"));
        assert!(script.contains("https://complete"));
    }
}

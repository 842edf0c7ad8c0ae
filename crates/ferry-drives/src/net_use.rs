//! Parser for the tabular output of the Windows `net use` command.
//!
//! # Design
//! - Pure function over captured text so it can be tested against literal tool output.
//! - Rows wrapped by the tool (long remote paths push the network column onto an
//!   indented continuation line) are re-joined before tokenising.
//! - The first and last non-empty lines (banner and footer) are discarded; the header
//!   row has no `X:` column and never matches the row pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};

const ROW_PATTERN: &str = r"^(.+) +(\w): +([^ ]+) +(.+)$";

/// One row of the `net use` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetUseEntry {
    /// Status column as printed (localised).
    pub status: String,
    /// Whether the status column reads exactly `OK`.
    pub status_ok: bool,
    /// Local drive letter.
    pub local: char,
    /// Remote share path.
    pub remote: String,
    /// Network provider description.
    pub network: String,
}

/// Parse `net use` output into table rows.
///
/// # Errors
///
/// Returns [`DriveError::Pattern`] if the row pattern fails to compile.
pub fn parse_net_use(output: &str) -> DriveResult<Vec<NetUseEntry>> {
    let row = Regex::new(ROW_PATTERN).map_err(|source| DriveError::Pattern { source })?;

    let lines: Vec<&str> = output
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| !line.is_empty() && !line.chars().all(|ch| ch == '-'))
        .collect();
    let table = match lines.len() {
        0..=2 => &[][..],
        len => &lines[1..len - 1],
    };

    let mut rows: Vec<String> = Vec::new();
    for line in table {
        let continuation = line.starts_with(char::is_whitespace);
        match rows.last_mut() {
            Some(previous) if continuation => {
                previous.push(' ');
                previous.push_str(line.trim());
            }
            _ => rows.push(line.trim().to_string()),
        }
    }

    Ok(rows
        .iter()
        .filter_map(|line| {
            let captures = row.captures(line)?;
            let status = captures.get(1)?.as_str().trim().to_string();
            let local = captures.get(2)?.as_str().trim().chars().next()?;
            Some(NetUseEntry {
                status_ok: status == "OK",
                status,
                local,
                remote: captures.get(3)?.as_str().trim().to_string(),
                network: captures.get(4)?.as_str().trim().to_string(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NORWEGIAN: &str = concat!(
        "Nye tilkoblinger vil bli lagret.\r\n",
        "\r\n",
        "\r\n",
        "Status       Lokalt    Eksternt                  Nettverk\r\n",
        "\r\n",
        "-------------------------------------------------------------------------------\r\n",
        "Ikke tilgjen U:        \\\\my\\very-very-very-very-very-very-very-long-path\r\n",
        "                                                 Microsoft Windows Network\r\n",
        "Ikke tilgjen V:        \\\\my\\path2                Microsoft Windows Network\r\n",
        "OK           Z:        \\\\my\\path3                Microsoft Windows Network\r\n",
        "Kommandoen er fullf\u{f8}rt.\r\n",
    );

    const ENGLISH: &str = "New connections will be remembered.

Status       Local     Remote                    Network

-------------------------------------------------------------------------------
OK           X:        \\\\media-nas\\ingest        Microsoft Windows Network
Disconnected Y:        \\\\media-nas\\archive       Microsoft Windows Network
The command completed successfully.
";

    #[test]
    fn parses_norwegian_output_with_wrapped_row() -> anyhow::Result<()> {
        let rows = parse_net_use(NORWEGIAN)?;
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].status, "Ikke tilgjen");
        assert_eq!(rows[0].local, 'U');
        assert_eq!(
            rows[0].remote,
            "\\\\my\\very-very-very-very-very-very-very-long-path"
        );
        assert_eq!(rows[0].network, "Microsoft Windows Network");

        assert_eq!(rows[1].local, 'V');
        assert_eq!(rows[1].remote, "\\\\my\\path2");
        assert_eq!(rows[2].local, 'Z');
        assert_eq!(rows[2].remote, "\\\\my\\path3");

        let ok: Vec<bool> = rows.iter().map(|row| row.status_ok).collect();
        assert_eq!(ok, vec![false, false, true]);
        Ok(())
    }

    #[test]
    fn parses_english_output() -> anyhow::Result<()> {
        let rows = parse_net_use(ENGLISH)?;
        assert_eq!(rows.len(), 2);
        assert!(rows[0].status_ok);
        assert_eq!(rows[0].local, 'X');
        assert_eq!(rows[0].remote, "\\\\media-nas\\ingest");
        assert_eq!(rows[1].status, "Disconnected");
        assert!(!rows[1].status_ok);
        Ok(())
    }

    #[test]
    fn empty_table_yields_no_rows() -> anyhow::Result<()> {
        let output = "New connections will be remembered.\n\nThere are no entries in the list.\n";
        assert!(parse_net_use(output)?.is_empty());
        assert!(parse_net_use("")?.is_empty());
        Ok(())
    }
}

//! Dump the final clusters.
//!
//! The report is line-oriented text. Every cluster takes three lines:
//!
//! ```text
//! cluster <index> <member count>
//! centroid <v0> <v1> ...
//! members <id> <id> ...
//! ```
//!
//! Floats are written with the shortest representation that parses back to the same
//! value, so [`read_report`] returns exactly what [`write_report`] got.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{CodebookError, Result};
use crate::kmeans::Clustering;
use crate::store::VectorStore;

/// Summary of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    /// cluster index
    pub index: usize,
    /// centroid coordinates
    pub centroid: Vec<f32>,
    /// identifiers of the member vectors, in store order
    pub members: Vec<u64>,
}

impl ClusterSummary {
    /// Number of member vectors.
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// One summary per cluster, empty clusters included.
pub fn summarize(store: &VectorStore, clustering: &Clustering) -> Vec<ClusterSummary> {
    let mut summaries: Vec<ClusterSummary> = (0..clustering.n_cluster())
        .map(|index| ClusterSummary {
            index,
            centroid: clustering.centroid(index).to_vec(),
            members: Vec::new(),
        })
        .collect();
    for (&id, &label) in store.ids().iter().zip(clustering.labels.iter()) {
        summaries[label as usize].members.push(id);
    }
    summaries
}

fn join<T: std::fmt::Display>(prefix: &str, values: &[T]) -> String {
    let mut line = String::from(prefix);
    for value in values.iter() {
        // writing into a `String` cannot fail
        let _ = write!(line, " {}", value);
    }
    line
}

/// Write cluster summaries in the report format.
pub fn write_report<W: Write>(mut writer: W, summaries: &[ClusterSummary]) -> Result<()> {
    for summary in summaries.iter() {
        writeln!(writer, "cluster {} {}", summary.index, summary.count())?;
        writeln!(writer, "{}", join("centroid", &summary.centroid))?;
        writeln!(writer, "{}", join("members", &summary.members))?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_fields<T: std::str::FromStr>(
    line: &str,
    line_no: usize,
    keyword: &str,
) -> Result<Vec<T>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(keyword) {
        return Err(CodebookError::malformed(
            line_no,
            format!("expect a `{}` line", keyword),
        ));
    }
    tokens
        .map(|token| {
            token.parse().map_err(|_| {
                CodebookError::malformed(line_no, format!("invalid value `{}`", token))
            })
        })
        .collect()
}

/// Parse a report written by [`write_report`].
pub fn read_report<R: BufRead>(reader: R) -> Result<Vec<ClusterSummary>> {
    let lines = reader
        .lines()
        .collect::<std::io::Result<Vec<String>>>()?;
    let lines: Vec<(usize, &String)> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();
    if lines.len() % 3 != 0 {
        return Err(CodebookError::malformed(
            lines.last().map(|(n, _)| *n).unwrap_or(0),
            "truncated cluster entry",
        ));
    }

    let mut summaries = Vec::with_capacity(lines.len() / 3);
    for entry in lines.chunks(3) {
        let (header_no, header) = entry[0];
        let header: Vec<usize> = parse_fields(header, header_no, "cluster")?;
        let [index, count] = header[..] else {
            return Err(CodebookError::malformed(
                header_no,
                "expect `cluster <index> <count>`",
            ));
        };
        let centroid: Vec<f32> = parse_fields(entry[1].1, entry[1].0, "centroid")?;
        let members: Vec<u64> = parse_fields(entry[2].1, entry[2].0, "members")?;
        if members.len() != count {
            return Err(CodebookError::malformed(
                entry[2].0,
                format!("cluster {} declares {} members, lists {}", index, count, members.len()),
            ));
        }
        summaries.push(ClusterSummary {
            index,
            centroid,
            members,
        });
    }
    Ok(summaries)
}

/// Write the `id<TAB>cluster` assignment of every vector, in store order.
pub fn write_assignments<W: Write>(
    mut writer: W,
    store: &VectorStore,
    clustering: &Clustering,
) -> Result<()> {
    for (&id, &label) in store.ids().iter().zip(clustering.labels.iter()) {
        writeln!(writer, "{}\t{}", id, label)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the report into the file at `path`.
pub fn save_report(path: &Path, summaries: &[ClusterSummary]) -> Result<()> {
    write_report(BufWriter::new(File::create(path)?), summaries)
}

/// Read the report file at `path`.
pub fn load_report(path: &Path) -> Result<Vec<ClusterSummary>> {
    read_report(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::io::Cursor;

    use super::*;
    use crate::distance::Distance;
    use crate::kmeans::KMeans;

    fn clustered() -> (VectorStore, Clustering) {
        let store = VectorStore::from_text(Cursor::new("0 0\n0 1\n10 0\n10 1\n5 100\n")).unwrap();
        let km = KMeans::new(3, 100, 1e-3, Distance::Euclidean).unwrap();
        // the third seed is far away from everything but the last vector
        let clustering = km
            .fit(&store, &[0.0, 0.0, 10.0, 0.0, 5.0, 100.0])
            .unwrap();
        (store, clustering)
    }

    #[test]
    fn test_summarize() {
        let (store, clustering) = clustered();
        let summaries = summarize(&store, &clustering);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].members, vec![1, 2]);
        assert_eq!(summaries[1].members, vec![3, 4]);
        assert_eq!(summaries[2].members, vec![5]);
        assert_eq!(summaries[1].centroid, vec![10.0, 0.5]);

        // partition: every identifier appears exactly once
        let mut seen = HashSet::new();
        for summary in summaries.iter() {
            for id in summary.members.iter() {
                assert!(seen.insert(*id));
            }
        }
        assert_eq!(seen.len(), store.len());
    }

    #[test]
    fn test_empty_cluster_reported() {
        let store = VectorStore::from_text(Cursor::new("0 0\n0 1\n1 0\n")).unwrap();
        let km = KMeans::new(2, 10, 1e-3, Distance::Euclidean).unwrap();
        let clustering = km.fit(&store, &[0.0, 0.0, 50.0, 50.0]).unwrap();
        let summaries = summarize(&store, &clustering);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].count(), 0);
        assert_eq!(summaries[1].centroid, vec![50.0, 50.0]);
    }

    #[test]
    fn test_report_text() {
        let (store, clustering) = clustered();
        let summaries = summarize(&store, &clustering);
        let mut buf = Vec::new();
        write_report(&mut buf, &summaries).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("cluster 0 2\ncentroid 0 0.5\nmembers 1 2\n"));
        assert_eq!(read_report(Cursor::new(buf)).unwrap(), summaries);

        let mut buf = Vec::new();
        write_assignments(&mut buf, &store, &clustering).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "1\t0\n2\t0\n3\t1\n4\t1\n5\t2\n"
        );
    }

    #[test]
    fn test_report_errors() {
        let err = read_report(Cursor::new("cluster 0 2\ncentroid 1 2\nmembers 1\n")).unwrap_err();
        assert!(matches!(err, CodebookError::MalformedInput { line: 3, .. }));
        let err = read_report(Cursor::new("cluster 0 1\ncentroid 1 x\nmembers 1\n")).unwrap_err();
        assert!(matches!(err, CodebookError::MalformedInput { line: 2, .. }));
        let err = read_report(Cursor::new("cluster 0 1\ncentroid 1 2\n")).unwrap_err();
        assert!(matches!(err, CodebookError::MalformedInput { .. }));
        let err = read_report(Cursor::new("cluster 0\ncentroid 1\nmembers\n")).unwrap_err();
        assert!(matches!(err, CodebookError::MalformedInput { line: 1, .. }));
    }
}

//! Byte-exact splitting into size-capped parts.

use std::path::Path;

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom},
};

use crate::error::{Error, Result};

/// One part of a split file. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub index: usize,
    pub total: usize,
    pub start: u64,
    pub len: u64,
}

impl PartRange {
    /// Caption suffix shown to the recipient, e.g. `(2/3)`.
    pub fn tag(&self) -> String {
        format!("({}/{})", self.index, self.total)
    }

    /// File name for this part: `<name>.001`, `<name>.002`, ...
    pub fn file_name(&self, name: &str) -> String {
        format!("{name}.{:03}", self.index)
    }
}

/// Consecutive ranges of exactly `cap` bytes; the last one holds the rest.
///
/// Returns `ceil(size / cap)` parts, none for an empty input.
pub fn plan_parts(size: u64, cap: u64) -> Result<Vec<PartRange>> {
    if cap == 0 {
        return Err(Error::invalid_input("chunk cap must be positive"));
    }
    let total = size.div_ceil(cap) as usize;
    Ok((0..total)
        .map(|i| {
            let start = i as u64 * cap;
            PartRange {
                index: i + 1,
                total,
                start,
                len: cap.min(size - start),
            }
        })
        .collect())
}

/// Copy `part`'s bytes out of `source` into a new file at `dest`.
pub async fn write_part(source: &Path, part: &PartRange, dest: &Path) -> Result<()> {
    let mut input = File::open(source)
        .await
        .map_err(|e| Error::io(source, e))?;
    input
        .seek(SeekFrom::Start(part.start))
        .await
        .map_err(|e| Error::io(source, e))?;

    let mut output = File::create(dest).await.map_err(|e| Error::io(dest, e))?;
    let copied = tokio::io::copy(&mut input.take(part.len), &mut output)
        .await
        .map_err(|e| Error::io(dest, e))?;
    output.flush().await.map_err(|e| Error::io(dest, e))?;

    if copied != part.len {
        return Err(Error::invalid_input(format!(
            "{} shrank while splitting: part {} has {copied} of {} bytes",
            source.display(),
            part.index,
            part.len
        )));
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const KIB: u64 = 1024;

    #[rstest]
    #[case(100 * KIB, 45 * KIB, vec![45 * KIB, 45 * KIB, 10 * KIB])]
    #[case(90 * KIB, 45 * KIB, vec![45 * KIB, 45 * KIB])]
    #[case(1, 45 * KIB, vec![1])]
    #[case(45 * KIB + 1, 45 * KIB, vec![45 * KIB, 1])]
    #[case(0, 45 * KIB, vec![])]
    fn part_sizes(#[case] size: u64, #[case] cap: u64, #[case] expected: Vec<u64>) {
        let parts = plan_parts(size, cap).unwrap();
        assert_eq!(parts.len() as u64, size.div_ceil(cap));
        assert_eq!(parts.iter().map(|p| p.len).collect::<Vec<_>>(), expected);
        assert_eq!(parts.iter().map(|p| p.len).sum::<u64>(), size);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.index, i + 1);
            assert_eq!(part.total, parts.len());
        }
    }

    #[test]
    fn zero_cap_is_rejected() {
        assert!(plan_parts(10, 0).is_err());
    }

    #[test]
    fn tags_and_names() {
        let part = PartRange {
            index: 2,
            total: 3,
            start: 0,
            len: 1,
        };
        assert_eq!(part.tag(), "(2/3)");
        assert_eq!(part.file_name("movie.mkv"), "movie.mkv.002");
    }

    #[tokio::test]
    async fn parts_concatenate_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        let mut joined = Vec::new();
        for part in plan_parts(data.len() as u64, 3_000).unwrap() {
            let dest = dir.path().join(part.file_name("source.bin"));
            write_part(&source, &part, &dest).await.unwrap();
            joined.extend(std::fs::read(&dest).unwrap());
        }
        assert_eq!(joined, data);
    }
}

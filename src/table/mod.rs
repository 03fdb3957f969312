pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::{IndexPolicy, Writer};

// This module provides facilities to both read and write sorted string
// tables.
//
// A sorted string table is an append-only sequence of key/value records
// written in non-decreasing key order, plus an optional second stream of
// index entries mapping keys (or key prefixes) to the byte offset the
// matching record starts at.
//
// Physically, both streams are sequences of length-prefixed frames (see
// recordio). The data stream holds {key, value} records; the index stream
// holds {key, offset} entries, emitted according to the writer's density
// policy: one entry every n records, or one entry whenever the length-n
// key prefix changes.
//
// Lookups never require the index; it only narrows where the reader's
// linear scan begins. Readers work against a fully cached copy of the
// index, against the on-disk index stream, or with no index at all.

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, HashMap};

    use rand::Rng;

    use crate::{
        cancel::Cancel,
        fs::MemFile,
        recordio::{IndexEntry, RecordReader},
    };

    use super::{IndexPolicy, Reader, Writer};

    fn testdata() -> HashMap<Vec<u8>, Vec<u8>> {
        [
            ("aaa", "foo"),
            ("aab", "bar"),
            ("abc", "bla"),
            ("bipolar", "why"),
            ("bac", "fire"),
            ("bat", "boo"),
            ("bit", "yes"),
            ("boat", "float"),
            ("cat", "maw"),
            ("cut", "ow"),
            ("cute", "oh"),
            ("dude", "bro"),
            ("ear", "tear"),
            ("europa", "do not go there"),
            ("excalibur", "wat"),
            ("flub", "fump"),
            ("inferno", "every single time"),
            ("jupiter", "sulfuric sunsets are rubbish"),
            ("mars", "syria planum"),
            ("mercury", "home"),
            ("mmm", "baz"),
            ("nasa", "spacex"),
            ("neptune", "underwater"),
            ("saturn", "white star"),
            ("uranus", "freezer"),
            ("venus", "sunev"),
            ("pluto", "too cute"),
            ("zqc", "quux"),
        ]
        .into_iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
    }

    #[test]
    fn test_write_and_read_single_keys_not_indexed() {
        let buf = MemFile::new();
        let mut writer = Writer::new(buf.clone());

        let testdata = testdata();
        let mut keys: Vec<_> = testdata.keys().collect();
        keys.sort();
        for k in keys {
            writer.write(k, &testdata[k]).unwrap();
        }

        let mut reader = Reader::new(buf.reopen());
        assert_eq!(reader.read(b"mmm").unwrap(), Some(b"baz".to_vec()));

        let mut reader = Reader::new(buf.reopen());
        assert_eq!(reader.read(b"nonexistent").unwrap(), None);

        let mut reader = Reader::new(buf.reopen());
        let (k, v) = reader.read_at_or_after(b"maa").unwrap().unwrap();
        assert_eq!(k, b"mars".to_vec());
        assert_eq!(v, b"syria planum".to_vec());
    }

    #[test]
    fn test_write_and_read_map_indexed_not_cached() {
        let buf = MemFile::new();
        let idx = MemFile::new();
        let mut writer = Writer::with_index(buf.clone(), idx.clone(), IndexPolicy::EveryN(4));
        writer.write_map(&testdata()).unwrap();

        let (mut reader, res) =
            Reader::with_index(buf.reopen(), idx.reopen(), false, &Cancel::new());
        res.unwrap();
        assert_eq!(reader.read(b"mmm").unwrap(), Some(b"baz".to_vec()));

        let (mut reader, res) =
            Reader::with_index(buf.reopen(), idx.reopen(), false, &Cancel::new());
        res.unwrap();
        let (k, v) = reader.read_at_or_after(b"maa").unwrap().unwrap();
        assert_eq!(k, b"mars".to_vec());
        assert_eq!(v, b"syria planum".to_vec());
    }

    #[test]
    fn test_write_and_read_map_indexed_cached() {
        let buf = MemFile::new();
        let idx = MemFile::new();
        let mut writer = Writer::with_index(buf.clone(), idx.clone(), IndexPolicy::EveryN(4));
        writer.write_map(&testdata()).unwrap();

        let (mut reader, res) =
            Reader::with_index(buf.reopen(), idx.reopen(), true, &Cancel::new());
        res.unwrap();

        // One cached reader can serve lookups in any order, since the
        // data stream here seeks natively.
        assert_eq!(reader.read(b"zqc").unwrap(), Some(b"quux".to_vec()));
        assert_eq!(reader.read(b"aaa").unwrap(), Some(b"foo".to_vec()));
        assert_eq!(reader.read(b"neptune").unwrap(), Some(b"underwater".to_vec()));
    }

    #[test]
    fn test_read_all_roundtrip() {
        let buf = MemFile::new();
        let mut writer = Writer::new(buf.clone());
        let testdata = testdata();
        writer.write_map(&testdata).unwrap();

        let mut reader = Reader::new(buf.reopen());
        let mut result = HashMap::new();
        reader.read_all(&Cancel::new(), &mut result).unwrap();

        // Nothing missing, nothing extra.
        assert_eq!(result, testdata);
    }

    #[test]
    fn test_exact_lookup_under_every_policy() {
        let testdata = testdata();
        for policy in [
            IndexPolicy::None,
            IndexPolicy::EveryN(1),
            IndexPolicy::EveryN(2),
            IndexPolicy::EveryN(4),
            IndexPolicy::PrefixLen(1),
            IndexPolicy::PrefixLen(2),
            IndexPolicy::PrefixLen(8),
        ] {
            let buf = MemFile::new();
            let idx = MemFile::new();
            let mut writer = Writer::with_index(buf.clone(), idx.clone(), policy);
            writer.write_map(&testdata).unwrap();

            // The density policy affects only how tight the scan's
            // starting point is, never the result.
            for build_cache in [false, true] {
                for (k, v) in &testdata {
                    let (mut reader, res) =
                        Reader::with_index(buf.reopen(), idx.reopen(), build_cache, &Cancel::new());
                    res.unwrap();
                    assert_eq!(
                        reader.read(k).unwrap(),
                        Some(v.clone()),
                        "policy {:?}, key {:?}",
                        policy,
                        String::from_utf8_lossy(k)
                    );
                }
            }
        }
    }

    #[test]
    fn test_lookup_bounds() {
        let buf = MemFile::new();
        let idx = MemFile::new();
        let mut writer = Writer::with_index(buf.clone(), idx.clone(), IndexPolicy::EveryN(4));
        writer.write_map(&testdata()).unwrap();

        // Above every key: cleanly absent.
        let (mut reader, _) = Reader::with_index(buf.reopen(), idx.reopen(), true, &Cancel::new());
        assert_eq!(reader.read(b"zzz").unwrap(), None);
        let (mut reader, _) = Reader::with_index(buf.reopen(), idx.reopen(), true, &Cancel::new());
        assert_eq!(reader.read_at_or_after(b"zzz").unwrap(), None);

        // Below every key: absent for exact lookup, first record for
        // at-or-after.
        let (mut reader, _) = Reader::with_index(buf.reopen(), idx.reopen(), true, &Cancel::new());
        assert_eq!(reader.read(b"a").unwrap(), None);
        let (mut reader, _) = Reader::with_index(buf.reopen(), idx.reopen(), true, &Cancel::new());
        let (k, _) = reader.read_at_or_after(b"a").unwrap().unwrap();
        assert_eq!(k, b"aaa".to_vec());
    }

    #[test]
    fn test_random_workloads() {
        let mut rng = rand::thread_rng();
        for policy in [IndexPolicy::EveryN(3), IndexPolicy::PrefixLen(4)] {
            let mut pairs = BTreeMap::new();
            for i in 0..200 {
                let key = format!("key{:05}", rng.gen_range(0..1000));
                pairs.insert(key.into_bytes(), format!("value{}", i).into_bytes());
            }

            let buf = MemFile::new();
            let idx = MemFile::new();
            let mut writer = Writer::with_index(buf.clone(), idx.clone(), policy);
            for (k, v) in &pairs {
                writer.write(k, v).unwrap();
            }

            let (mut reader, res) =
                Reader::with_index(buf.reopen(), idx.reopen(), true, &Cancel::new());
            res.unwrap();
            for (k, v) in &pairs {
                assert_eq!(reader.read(k).unwrap(), Some(v.clone()));
            }
            assert_eq!(reader.read(b"zzzzz").unwrap(), None);
        }
    }

    #[test]
    fn test_file_backed_table() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let data_path = dir.path().join("planets.sst");
        let idx_path = dir.path().join("planets.idx");

        let data = std::fs::File::create(&data_path)?;
        let idx = std::fs::File::create(&idx_path)?;
        let mut writer = Writer::with_index(data, idx, IndexPolicy::EveryN(4));
        writer.write_map(&testdata())?;

        let data = std::fs::File::open(&data_path)?;
        let idx = std::fs::File::open(&idx_path)?;
        let (mut reader, res) = Reader::with_index(data, idx, true, &Cancel::new());
        res?;

        assert_eq!(reader.read(b"mmm")?, Some(b"baz".to_vec()));
        assert_eq!(reader.read(b"venus")?, Some(b"sunev".to_vec()));
        assert_eq!(reader.read(b"nonexistent")?, None);

        let (k, v) = reader.read_at_or_after(b"maa")?.unwrap();
        assert_eq!(k, b"mars".to_vec());
        assert_eq!(v, b"syria planum".to_vec());

        Ok(())
    }

    #[test]
    fn test_table_trace() {
        datadriven::walk("src/table/testdata", |f| {
            let mut data = MemFile::new();
            let mut idx = MemFile::new();
            let mut indexed = false;
            let mut writer: Option<Writer<MemFile, MemFile>> = None;
            f.run(|test_case| match test_case.directive.as_str() {
                "open" => {
                    data = MemFile::new();
                    idx = MemFile::new();
                    let n: usize = test_case
                        .args
                        .get("n")
                        .map(|v| v[0].parse().unwrap())
                        .unwrap_or(0);
                    let policy = match test_case.args.get("policy").map(|v| v[0].as_str()) {
                        Some("every-n") => IndexPolicy::EveryN(n),
                        Some("prefix-len") => IndexPolicy::PrefixLen(n),
                        _ => IndexPolicy::None,
                    };
                    indexed = policy != IndexPolicy::None;
                    writer = Some(Writer::with_index(data.clone(), idx.clone(), policy));
                    "ok\n".into()
                }
                "write" => {
                    let w = writer.as_mut().unwrap();
                    for line in test_case.input.lines() {
                        let eq_idx = line.find('=').unwrap();
                        let key = &line[..eq_idx];
                        let val = &line[eq_idx + 1..];
                        if let Err(err) = w.write(key.as_bytes(), val.as_bytes()) {
                            return format!("err: {}\n", err);
                        }
                    }
                    "ok\n".into()
                }
                "index" => {
                    let mut r = RecordReader::new(idx.reopen());
                    let mut out = String::new();
                    while let Some(e) = r.read_message::<IndexEntry>().unwrap() {
                        out.push_str(&format!(
                            "{}@{}\n",
                            String::from_utf8_lossy(&e.key),
                            e.offset
                        ));
                    }
                    if out.is_empty() {
                        out.push_str("empty\n");
                    }
                    out
                }
                "get" => {
                    let key = &test_case.args.get("key").unwrap()[0];
                    let result = if indexed {
                        let (mut rd, res) = Reader::with_index(
                            data.reopen(),
                            idx.reopen(),
                            test_case.args.contains_key("cache"),
                            &Cancel::new(),
                        );
                        res.unwrap();
                        rd.read(key.as_bytes()).unwrap()
                    } else {
                        let mut rd = Reader::new(data.reopen());
                        rd.read(key.as_bytes()).unwrap()
                    };
                    match result {
                        Some(v) => format!("{}\n", String::from_utf8_lossy(&v)),
                        None => "not found\n".into(),
                    }
                }
                "get-or-after" => {
                    let key = &test_case.args.get("key").unwrap()[0];
                    let result = if indexed {
                        let (mut rd, res) = Reader::with_index(
                            data.reopen(),
                            idx.reopen(),
                            test_case.args.contains_key("cache"),
                            &Cancel::new(),
                        );
                        res.unwrap();
                        rd.read_at_or_after(key.as_bytes()).unwrap()
                    } else {
                        let mut rd = Reader::new(data.reopen());
                        rd.read_at_or_after(key.as_bytes()).unwrap()
                    };
                    match result {
                        Some((k, v)) => format!(
                            "{}={}\n",
                            String::from_utf8_lossy(&k),
                            String::from_utf8_lossy(&v)
                        ),
                        None => "not found\n".into(),
                    }
                }
                "scan" => {
                    let mut rd = Reader::new(data.reopen());
                    let mut out = String::new();
                    while let Some((k, v)) = rd.read_next().unwrap() {
                        out.push_str(&format!(
                            "{}={}\n",
                            String::from_utf8_lossy(&k),
                            String::from_utf8_lossy(&v)
                        ));
                    }
                    out
                }
                _ => {
                    panic!("unhandled");
                }
            })
        })
    }
}

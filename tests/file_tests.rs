use rmdb::common::Result;
use rmdb::storage::{File, FileMode, MemoryFile, PosixFile};

#[test]
fn test_posix_file_block_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blocks.dat");

    let mut file = PosixFile::new(&path, FileMode::WRITE)?;
    file.write_block(b"hello blocks", 100)?;
    assert_eq!(file.size()?, 112);

    let block = file.read_block(100, 12)?;
    assert_eq!(&block, b"hello blocks");

    // Reads past EOF are rejected.
    assert!(file.read_block(200, 8).is_err());
    Ok(())
}

#[test]
fn test_memory_file_matches_posix_semantics() -> Result<()> {
    let mut file = MemoryFile::new(FileMode::WRITE);
    file.write_block(b"abc", 10)?;
    assert_eq!(file.size()?, 13);
    assert_eq!(file.read_block(10, 3)?, b"abc");

    file.resize(5)?;
    assert!(file.read_block(10, 3).is_err());
    Ok(())
}

#[test]
fn test_read_only_file_rejects_writes() -> Result<()> {
    let mut file = MemoryFile::new(FileMode::READ);
    assert!(file.write_block(b"x", 0).is_err());
    assert!(file.resize(10).is_err());
    Ok(())
}

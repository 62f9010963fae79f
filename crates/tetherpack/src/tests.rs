use crate::*;

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_scalars_roundtrip() -> Result<()> {
    let mut w = Writer::new();
    w.unit();
    w.bool(true);
    w.bool(false);
    w.u64(u64::MAX);
    w.i64(i64::MIN);
    w.f64(-0.5);

    let bytes = w.finish()?;
    let mut r = Reader::new(&bytes);

    r.unit()?;
    assert!(r.bool()?);
    assert!(!r.bool()?);
    assert_eq!(r.u64()?, u64::MAX);
    assert_eq!(r.i64()?, i64::MIN);
    assert_eq!(r.f64()?, -0.5);
    r.finish()
}

#[test]
fn test_integers_are_little_endian() -> Result<()> {
    let mut w = Writer::new();
    w.u64(0x0102);
    let bytes = w.finish()?;
    assert_eq!(bytes, vec![Tag::U64 as u8, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_blobs() -> Result<()> {
    let mut w = Writer::new();
    w.str("héllo")?;
    w.str("")?;
    w.bytes(&[0xde, 0xad])?;

    let bytes = w.finish()?;
    let mut r = Reader::new(&bytes);
    assert_eq!(r.str()?, "héllo");
    assert_eq!(r.str()?, "");
    assert_eq!(r.bytes()?, &[0xde, 0xad]);
    Ok(())
}

#[test]
fn test_byte_array_checks_length() -> Result<()> {
    let mut w = Writer::new();
    w.bytes(&[1, 2, 3])?;
    let bytes = w.finish()?;

    let err = Reader::new(&bytes).byte_array::<4>().unwrap_err();
    assert_eq!(err, Error::LengthMismatch { expected: 4, found: 3 });
    assert_eq!(Reader::new(&bytes).byte_array::<3>()?, [1, 2, 3]);
    Ok(())
}

// ============================================================================
//  SCOPES
// ============================================================================

#[test]
fn test_nested_scopes() -> Result<()> {
    let mut w = Writer::new();
    w.tagged_begin("point")?;
    w.list_begin();
    w.i64(3);
    w.i64(-4);
    w.list_end()?;
    w.tagged_end()?;
    w.str("after")?;

    let bytes = w.finish()?;
    let mut r = Reader::new(&bytes);

    let (name, mut body) = r.tagged()?;
    assert_eq!(name, "point");
    let mut items = body.list()?;
    assert_eq!(items.i64()?, 3);
    assert_eq!(items.i64()?, -4);
    assert!(items.is_empty());
    body.finish()?;

    assert_eq!(r.str()?, "after");
    r.finish()
}

#[test]
fn test_skip_whole_scope() -> Result<()> {
    let mut w = Writer::new();
    w.list_begin();
    w.tagged_begin("inner")?;
    w.bytes(&[9; 40])?;
    w.tagged_end()?;
    w.list_end()?;
    w.bool(true);

    let bytes = w.finish()?;
    let mut r = Reader::new(&bytes);
    r.skip()?;
    assert!(r.bool()?);
    Ok(())
}

#[test]
fn test_unclosed_scope_fails_finish() {
    let mut w = Writer::new();
    w.list_begin();
    assert_eq!(w.finish().unwrap_err(), Error::ScopeStillOpen(1));
}

#[test]
fn test_mismatched_close() {
    let mut w = Writer::new();
    w.list_begin();
    let err = w.tagged_end().unwrap_err();
    assert_eq!(err, Error::ScopeMismatch { expected: ScopeKind::Tagged, found: ScopeKind::List });
    // The list is still open and can be closed normally.
    assert!(w.list_end().is_ok());
}

#[test]
fn test_close_without_open() {
    let mut w = Writer::new();
    assert_eq!(w.list_end().unwrap_err(), Error::ScopeUnderflow);
}

// ============================================================================
//  MALFORMED INPUT
// ============================================================================

#[test]
fn test_wrong_tag_is_reported() -> Result<()> {
    let mut w = Writer::new();
    w.u64(1);
    let bytes = w.finish()?;
    let err = Reader::new(&bytes).i64().unwrap_err();
    assert_eq!(err, Error::UnexpectedTag { expected: Tag::I64, found: Tag::U64 });
    Ok(())
}

#[test]
fn test_invalid_tag_byte() {
    let err = Reader::new(&[0x7f]).peek_tag().unwrap_err();
    assert_eq!(err, Error::InvalidTag(0x7f));
}

#[test]
fn test_truncated_blob() {
    // Str tag claiming 10 bytes with only 2 present.
    let bytes = [Tag::Str as u8, 10, 0, 0, 0, b'h', b'i'];
    assert_eq!(Reader::new(&bytes).str().unwrap_err(), Error::UnexpectedEnd);
}

#[test]
fn test_invalid_utf8() {
    let bytes = [Tag::Str as u8, 2, 0, 0, 0, 0xff, 0xfe];
    assert_eq!(Reader::new(&bytes).str().unwrap_err(), Error::InvalidUtf8);
}

#[test]
fn test_trailing_bytes() -> Result<()> {
    let mut w = Writer::new();
    w.unit();
    w.unit();
    let bytes = w.finish()?;
    let mut r = Reader::new(&bytes);
    r.unit()?;
    assert_eq!(r.finish().unwrap_err(), Error::TrailingBytes(1));
    Ok(())
}

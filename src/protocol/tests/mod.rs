use bytes::Bytes;

use super::*;

const LIMIT: usize = 1024;

fn parse_one(input: &[u8]) -> Result<Resp, RespError> {
    let mut parser = RespParser::new(LIMIT);
    match parser.feed(input)? {
        Parsed::Value(resp) => {
            assert_eq!(parser.buffered(), 0);
            Ok(resp)
        }
        Parsed::NeedMore => panic!("incomplete input {:?}", input),
    }
}

fn parse_err(input: &[u8]) -> RespError {
    RespParser::new(LIMIT).feed(input).unwrap_err()
}

#[test]
pub fn test_simple_string() -> Result<(), RespError> {
    assert_eq!(parse_one(b"+hello\r\n")?, Resp::SimpleString(Bytes::from("hello")));
    assert_eq!(parse_one(b"-Bar\r\n")?, Resp::Error(Bytes::from("Bar")));
    Ok(())
}

#[test]
pub fn test_integer() -> Result<(), RespError> {
    assert_eq!(parse_one(b":42\r\n")?, Resp::Integer(42));
    assert_eq!(parse_one(b":-7\r\n")?, Resp::Integer(-7));
    assert_eq!(parse_err(b":4x\r\n"), RespError::InvalidInteger("4x".to_string()));
    Ok(())
}

#[test]
pub fn test_nil() -> Result<(), RespError> {
    assert_eq!(parse_one(b"$-1\r\n")?, Resp::Nil);
    assert_eq!(parse_one(b"*-1\r\n")?, Resp::Nil);
    Ok(())
}

#[test]
pub fn test_bulk_string() -> Result<(), RespError> {
    assert_eq!(parse_one(b"$6\r\nfoobar\r\n")?, Resp::bulk("foobar"));
    assert_eq!(parse_one(b"$0\r\n\r\n")?, Resp::bulk(""));
    // bulk strings are binary safe
    assert_eq!(parse_one(b"$4\r\na\r\nb\r\n")?, Resp::bulk("a\r\nb"));
    Ok(())
}

#[test]
pub fn test_array_of_arrays() -> Result<(), RespError> {
    let resp = parse_one(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Foo\r\n$3\r\nbar\r\n")?;
    assert_eq!(
        resp,
        Resp::Array(vec![
            Resp::Array(vec![Resp::Integer(1), Resp::Integer(2), Resp::Integer(3)]),
            Resp::Array(vec![Resp::SimpleString(Bytes::from("Foo")), Resp::bulk("bar")]),
        ])
    );
    Ok(())
}

#[test]
pub fn test_errors() {
    assert_eq!(parse_err(b")hello\r\n"), RespError::UnknownSymbol(b')'));
    assert_eq!(
        parse_err(b"*2\r\n$3\r\nfoo\r\n)hello"),
        RespError::UnknownSymbol(b')')
    );
    assert_eq!(parse_err(b"$4\r\nfoo\r\nxx"), RespError::MissingCrlf { len: 4 });
    assert_eq!(parse_err(b"$-2\r\n"), RespError::InvalidLength(-2));
}

#[test]
pub fn test_incomplete_input_waits() -> Result<(), RespError> {
    let mut parser = RespParser::new(LIMIT);
    assert_eq!(parser.feed(b"")?, Parsed::NeedMore);
    assert_eq!(parser.feed(b"+hello")?, Parsed::NeedMore);
    // a bulk string missing its terminator is not an error yet
    let mut parser = RespParser::new(LIMIT);
    assert_eq!(parser.feed(b"$3\r\nfoo")?, Parsed::NeedMore);
    assert_eq!(parser.feed(b"\r")?, Parsed::NeedMore);
    assert_eq!(parser.feed(b"\n")?, Parsed::Value(Resp::bulk("foo")));
    Ok(())
}

#[test]
pub fn test_byte_at_a_time() -> Result<(), RespError> {
    let frame = b"*3\r\n$4\r\ntype\r\n:12\r\n*0\r\n";
    let mut parser = RespParser::new(LIMIT);
    for (index, byte) in frame.iter().enumerate() {
        let parsed = parser.feed(&[*byte])?;
        if index + 1 < frame.len() {
            assert_eq!(parsed, Parsed::NeedMore);
        } else {
            assert_eq!(
                parsed,
                Parsed::Value(Resp::Array(vec![
                    Resp::bulk("type"),
                    Resp::Integer(12),
                    Resp::Array(vec![])
                ]))
            );
        }
    }
    Ok(())
}

#[test]
pub fn test_several_values_in_one_read() -> Result<(), RespError> {
    let mut parser = RespParser::new(LIMIT);
    assert_eq!(parser.feed(b":1\r\n:2\r\n:3")?, Parsed::Value(Resp::Integer(1)));
    assert_eq!(parser.parse()?, Parsed::Value(Resp::Integer(2)));
    assert_eq!(parser.parse()?, Parsed::NeedMore);
    assert_eq!(parser.feed(b"\r\n")?, Parsed::Value(Resp::Integer(3)));
    assert_eq!(parser.buffered(), 0);
    Ok(())
}

#[test]
pub fn test_frame_limit() {
    let mut parser = RespParser::new(16);
    assert_eq!(
        parser.feed(b"$100\r\n"),
        Err(RespError::FrameTooLarge { limit: 16 })
    );

    let mut parser = RespParser::new(16);
    assert_eq!(
        parser.feed(b"+aaaaaaaaaaaaaaaaaaaa"),
        Err(RespError::FrameTooLarge { limit: 16 })
    );

    let mut parser = RespParser::new(16);
    assert_eq!(
        parser.feed(b"*3\r\n$5\r\naaaaa\r\n$5\r\nbbbbb\r\n"),
        Err(RespError::FrameTooLarge { limit: 16 })
    );
}

#[test]
pub fn test_large_bulk_in_small_reads() -> Result<(), RespError> {
    let payload = vec![b'x'; 900];
    let mut frame = b"*2\r\n$4\r\nbody\r\n$900\r\n".to_vec();
    let header_len = frame.len();
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\r\n");

    let mut parser = RespParser::new(LIMIT);
    assert_eq!(parser.feed(&frame[..header_len])?, Parsed::NeedMore);
    assert_eq!(parser.missing(), 902);
    for chunk in frame[header_len..frame.len() - 1].chunks(64) {
        assert_eq!(parser.feed(chunk)?, Parsed::NeedMore);
    }
    assert_eq!(parser.missing(), 1);
    assert_eq!(
        parser.feed(&frame[frame.len() - 1..])?,
        Parsed::Value(Resp::Array(vec![
            Resp::bulk("body"),
            Resp::bulk(Bytes::from(payload))
        ]))
    );
    assert_eq!(parser.missing(), 0);
    assert_eq!(parser.buffered(), 0);
    Ok(())
}

#[test]
pub fn test_announced_lengths_count_against_limit() {
    // the second bulk string cannot fit whatever follows
    let mut parser = RespParser::new(LIMIT);
    assert_eq!(
        parser.feed(b"*2\r\n$1000\r\n"),
        Ok(Parsed::NeedMore)
    );
    assert_eq!(
        parser.feed(&[b'a'; 1000]),
        Ok(Parsed::NeedMore)
    );
    assert_eq!(
        parser.feed(b"\r\n$100\r\n"),
        Err(RespError::FrameTooLarge { limit: LIMIT })
    );

    // a length line that cannot be an integer is refused before its end arrives
    assert_eq!(
        parse_err(b"*123456789012345678901234"),
        RespError::InvalidInteger("12345678901234567890".to_string())
    );
}

#[test]
pub fn test_nesting_limit() {
    let mut input = Vec::new();
    for _ in 0..(MAX_DEPTH + 8) {
        input.extend_from_slice(b"*1\r\n");
    }
    input.extend_from_slice(b":1\r\n");
    assert_eq!(
        RespParser::new(LIMIT).feed(&input),
        Err(RespError::TooDeep(MAX_DEPTH))
    );
}

#[test]
pub fn test_encode() -> Result<(), RespError> {
    let resp = Resp::Array(vec![
        Resp::from("type"),
        Resp::Integer(-3),
        Resp::Array(vec![Resp::bulk(Bytes::from_static(&[0, 13, 10, 255])), Resp::Nil]),
    ]);
    let bytes = resp.to_bytes();
    assert_eq!(
        &bytes[..],
        &b"*3\r\n$4\r\ntype\r\n:-3\r\n*2\r\n$4\r\n\x00\r\n\xff\r\n$-1\r\n"[..]
    );
    assert_eq!(parse_one(&bytes)?, resp);
    Ok(())
}

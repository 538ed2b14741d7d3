//! Payload encode/decode for every [`Command`] and [`Response`] shape.
//!
//! Conventions, fixed by the protocol: all integers and IEEE-754 floats
//! are big-endian; strings are a `u32` byte length followed by UTF-8
//! bytes; optional fields are a `u8` presence flag; sequences are a `u32`
//! count followed by the elements in order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate};

use crate::data::{Coordinates, Country, EyeColor, Location, Person, PersonDraft};
use crate::proto::command::{
    CollectionInfo, Command, Fault, Message, Op, Payload, Predicate, Reply, Response,
};
use crate::proto::frame::{self, KIND_COMMAND, KIND_RESPONSE};
use crate::{Error, Result};

/// Scripts may nest (a script op inside a script); past this depth the
/// decoder gives up rather than recurse on hostile input.
const MAX_SCRIPT_DEPTH: u8 = 8;

const OP_ADD: u8 = 0x01;
const OP_UPDATE: u8 = 0x02;
const OP_REMOVE_BY_ID: u8 = 0x03;
const OP_CLEAR: u8 = 0x04;
const OP_LIST: u8 = 0x05;
const OP_REMOVE_MATCHING: u8 = 0x06;
const OP_INFO: u8 = 0x07;
const OP_SUM_OF_HEIGHT: u8 = 0x08;
const OP_FILTER_CONTAINS_NAME: u8 = 0x09;
const OP_RUN_SCRIPT: u8 = 0x0a;

const PRED_NAME_CONTAINS: u8 = 0x01;
const PRED_HEIGHT_BELOW: u8 = 0x02;
const PRED_NATIONALITY_IS: u8 = 0x03;

const REPLY_OK: u8 = 0x00;
const REPLY_ERR: u8 = 0x01;

const PAYLOAD_NONE: u8 = 0x00;
const PAYLOAD_RECORD: u8 = 0x01;
const PAYLOAD_RECORDS: u8 = 0x02;
const PAYLOAD_COUNT: u8 = 0x03;
const PAYLOAD_INFO: u8 = 0x04;

const FAULT_VALIDATION: u8 = 0x01;
const FAULT_NOT_FOUND: u8 = 0x02;
const FAULT_PERSISTENCE: u8 = 0x03;
const FAULT_BAD_MESSAGE: u8 = 0x04;
const FAULT_UNSUPPORTED_VERSION: u8 = 0x05;

/// Encodes a command into a complete frame, header included. Fails with
/// a codec error when the encoded payload exceeds the frame cap.
pub fn encode_command(cmd: &Command) -> Result<Bytes> {
    let mut payload = BytesMut::new();
    payload.put_u64(cmd.token);
    put_op(&mut payload, &cmd.op);
    frame::enframe(KIND_COMMAND, &payload)
}

/// Encodes a response into a complete frame, header included. Fails with
/// a codec error when the encoded payload exceeds the frame cap (a
/// listing over a very large collection can outgrow it).
pub fn encode_response(resp: &Response) -> Result<Bytes> {
    let mut payload = BytesMut::new();
    payload.put_u64(resp.token);
    put_reply(&mut payload, &resp.body);
    frame::enframe(KIND_RESPONSE, &payload)
}

/// Decodes the payload of an extracted frame. The payload must be
/// consumed exactly; trailing bytes are a codec error.
pub fn decode(kind: u8, payload: Bytes) -> Result<Message> {
    let mut buf = payload;
    let msg = match kind {
        KIND_COMMAND => {
            need(&buf, 8)?;
            let token = buf.get_u64();
            let op = get_op(&mut buf, 0)?;
            Message::Command(Command { token, op })
        }
        KIND_RESPONSE => {
            need(&buf, 8)?;
            let token = buf.get_u64();
            let body = get_reply(&mut buf)?;
            Message::Response(Response { token, body })
        }
        other => return Err(Error::codec(format!("unknown message kind 0x{other:02x}"))),
    };
    if buf.has_remaining() {
        return Err(Error::codec(format!(
            "{} trailing bytes after payload",
            buf.remaining()
        )));
    }
    Ok(msg)
}

fn put_op(dst: &mut BytesMut, op: &Op) {
    match op {
        Op::Add(draft) => {
            dst.put_u8(OP_ADD);
            put_draft(dst, draft);
        }
        Op::Update { id, draft } => {
            dst.put_u8(OP_UPDATE);
            dst.put_u64(*id);
            put_draft(dst, draft);
        }
        Op::RemoveById(id) => {
            dst.put_u8(OP_REMOVE_BY_ID);
            dst.put_u64(*id);
        }
        Op::Clear => dst.put_u8(OP_CLEAR),
        Op::List => dst.put_u8(OP_LIST),
        Op::RemoveMatching(pred) => {
            dst.put_u8(OP_REMOVE_MATCHING);
            put_predicate(dst, pred);
        }
        Op::Info => dst.put_u8(OP_INFO),
        Op::SumOfHeight => dst.put_u8(OP_SUM_OF_HEIGHT),
        Op::FilterContainsName(needle) => {
            dst.put_u8(OP_FILTER_CONTAINS_NAME);
            put_string(dst, needle);
        }
        Op::RunScript(ops) => {
            dst.put_u8(OP_RUN_SCRIPT);
            dst.put_u32(ops.len() as u32);
            for op in ops {
                put_op(dst, op);
            }
        }
    }
}

fn get_op(buf: &mut Bytes, depth: u8) -> Result<Op> {
    need(buf, 1)?;
    let op = match buf.get_u8() {
        OP_ADD => Op::Add(get_draft(buf)?),
        OP_UPDATE => {
            need(buf, 8)?;
            let id = buf.get_u64();
            Op::Update {
                id,
                draft: get_draft(buf)?,
            }
        }
        OP_REMOVE_BY_ID => {
            need(buf, 8)?;
            Op::RemoveById(buf.get_u64())
        }
        OP_CLEAR => Op::Clear,
        OP_LIST => Op::List,
        OP_REMOVE_MATCHING => Op::RemoveMatching(get_predicate(buf)?),
        OP_INFO => Op::Info,
        OP_SUM_OF_HEIGHT => Op::SumOfHeight,
        OP_FILTER_CONTAINS_NAME => Op::FilterContainsName(get_string(buf)?),
        OP_RUN_SCRIPT => {
            if depth >= MAX_SCRIPT_DEPTH {
                return Err(Error::codec("script nesting too deep"));
            }
            need(buf, 4)?;
            let count = buf.get_u32();
            let mut ops = Vec::new();
            for _ in 0..count {
                ops.push(get_op(buf, depth + 1)?);
            }
            Op::RunScript(ops)
        }
        other => return Err(Error::codec(format!("unknown op tag 0x{other:02x}"))),
    };
    Ok(op)
}

fn put_predicate(dst: &mut BytesMut, pred: &Predicate) {
    match pred {
        Predicate::NameContains(needle) => {
            dst.put_u8(PRED_NAME_CONTAINS);
            put_string(dst, needle);
        }
        Predicate::HeightBelow(limit) => {
            dst.put_u8(PRED_HEIGHT_BELOW);
            dst.put_i32(*limit);
        }
        Predicate::NationalityIs(country) => {
            dst.put_u8(PRED_NATIONALITY_IS);
            dst.put_u8(country_tag(*country));
        }
    }
}

fn get_predicate(buf: &mut Bytes) -> Result<Predicate> {
    need(buf, 1)?;
    match buf.get_u8() {
        PRED_NAME_CONTAINS => Ok(Predicate::NameContains(get_string(buf)?)),
        PRED_HEIGHT_BELOW => {
            need(buf, 4)?;
            Ok(Predicate::HeightBelow(buf.get_i32()))
        }
        PRED_NATIONALITY_IS => Ok(Predicate::NationalityIs(get_country(buf)?)),
        other => Err(Error::codec(format!("unknown predicate tag 0x{other:02x}"))),
    }
}

fn put_reply(dst: &mut BytesMut, reply: &Reply) {
    match reply {
        Reply::Ok(payload) => {
            dst.put_u8(REPLY_OK);
            put_payload(dst, payload);
        }
        Reply::Err(fault) => {
            dst.put_u8(REPLY_ERR);
            put_fault(dst, fault);
        }
    }
}

fn get_reply(buf: &mut Bytes) -> Result<Reply> {
    need(buf, 1)?;
    match buf.get_u8() {
        REPLY_OK => Ok(Reply::Ok(get_payload(buf)?)),
        REPLY_ERR => Ok(Reply::Err(get_fault(buf)?)),
        other => Err(Error::codec(format!("unknown reply tag 0x{other:02x}"))),
    }
}

fn put_payload(dst: &mut BytesMut, payload: &Payload) {
    match payload {
        Payload::None => dst.put_u8(PAYLOAD_NONE),
        Payload::Record(person) => {
            dst.put_u8(PAYLOAD_RECORD);
            put_person(dst, person);
        }
        Payload::Records(people) => {
            dst.put_u8(PAYLOAD_RECORDS);
            dst.put_u32(people.len() as u32);
            for person in people {
                put_person(dst, person);
            }
        }
        Payload::Count(n) => {
            dst.put_u8(PAYLOAD_COUNT);
            dst.put_u64(*n);
        }
        Payload::Info(info) => {
            dst.put_u8(PAYLOAD_INFO);
            put_string(dst, &info.backing);
            put_date(dst, info.init_date);
            dst.put_u64(info.len);
        }
    }
}

fn get_payload(buf: &mut Bytes) -> Result<Payload> {
    need(buf, 1)?;
    match buf.get_u8() {
        PAYLOAD_NONE => Ok(Payload::None),
        PAYLOAD_RECORD => Ok(Payload::Record(get_person(buf)?)),
        PAYLOAD_RECORDS => {
            need(buf, 4)?;
            let count = buf.get_u32();
            let mut people = Vec::new();
            for _ in 0..count {
                people.push(get_person(buf)?);
            }
            Ok(Payload::Records(people))
        }
        PAYLOAD_COUNT => {
            need(buf, 8)?;
            Ok(Payload::Count(buf.get_u64()))
        }
        PAYLOAD_INFO => {
            let backing = get_string(buf)?;
            let init_date = get_date(buf)?;
            need(buf, 8)?;
            let len = buf.get_u64();
            Ok(Payload::Info(CollectionInfo {
                backing,
                init_date,
                len,
            }))
        }
        other => Err(Error::codec(format!("unknown payload tag 0x{other:02x}"))),
    }
}

fn put_fault(dst: &mut BytesMut, fault: &Fault) {
    match fault {
        Fault::Validation { field, reason } => {
            dst.put_u8(FAULT_VALIDATION);
            put_string(dst, field);
            put_string(dst, reason);
        }
        Fault::NotFound { id } => {
            dst.put_u8(FAULT_NOT_FOUND);
            dst.put_u64(*id);
        }
        Fault::Persistence { detail } => {
            dst.put_u8(FAULT_PERSISTENCE);
            put_string(dst, detail);
        }
        Fault::BadMessage { detail } => {
            dst.put_u8(FAULT_BAD_MESSAGE);
            put_string(dst, detail);
        }
        Fault::UnsupportedVersion { version } => {
            dst.put_u8(FAULT_UNSUPPORTED_VERSION);
            dst.put_u8(*version);
        }
    }
}

fn get_fault(buf: &mut Bytes) -> Result<Fault> {
    need(buf, 1)?;
    match buf.get_u8() {
        FAULT_VALIDATION => Ok(Fault::Validation {
            field: get_string(buf)?,
            reason: get_string(buf)?,
        }),
        FAULT_NOT_FOUND => {
            need(buf, 8)?;
            Ok(Fault::NotFound { id: buf.get_u64() })
        }
        FAULT_PERSISTENCE => Ok(Fault::Persistence {
            detail: get_string(buf)?,
        }),
        FAULT_BAD_MESSAGE => Ok(Fault::BadMessage {
            detail: get_string(buf)?,
        }),
        FAULT_UNSUPPORTED_VERSION => {
            need(buf, 1)?;
            Ok(Fault::UnsupportedVersion {
                version: buf.get_u8(),
            })
        }
        other => Err(Error::codec(format!("unknown fault tag 0x{other:02x}"))),
    }
}

fn put_person(dst: &mut BytesMut, person: &Person) {
    dst.put_u64(person.id);
    put_date(dst, person.created_on);
    put_draft_fields(dst, &person.draft());
}

fn get_person(buf: &mut Bytes) -> Result<Person> {
    need(buf, 8)?;
    let id = buf.get_u64();
    let created_on = get_date(buf)?;
    let draft = get_draft(buf)?;
    Ok(draft.into_person(id, created_on))
}

fn put_draft(dst: &mut BytesMut, draft: &PersonDraft) {
    put_draft_fields(dst, draft);
}

fn put_draft_fields(dst: &mut BytesMut, draft: &PersonDraft) {
    put_string(dst, &draft.name);
    dst.put_f32(draft.coordinates.x);
    dst.put_f32(draft.coordinates.y);
    match draft.height {
        Some(h) => {
            dst.put_u8(1);
            dst.put_i32(h);
        }
        None => dst.put_u8(0),
    }
    put_opt_string(dst, draft.passport_id.as_deref());
    dst.put_u8(eye_color_tag(draft.eye_color));
    dst.put_u8(country_tag(draft.nationality));
    match &draft.location {
        Some(loc) => {
            dst.put_u8(1);
            dst.put_f64(loc.x);
            dst.put_f32(loc.y);
            dst.put_i64(loc.z);
            put_opt_string(dst, loc.name.as_deref());
        }
        None => dst.put_u8(0),
    }
}

fn get_draft(buf: &mut Bytes) -> Result<PersonDraft> {
    let name = get_string(buf)?;
    need(buf, 8)?;
    let coordinates = Coordinates {
        x: buf.get_f32(),
        y: buf.get_f32(),
    };
    let height = if get_flag(buf)? {
        need(buf, 4)?;
        Some(buf.get_i32())
    } else {
        None
    };
    let passport_id = get_opt_string(buf)?;
    let eye_color = get_eye_color(buf)?;
    let nationality = get_country(buf)?;
    let location = if get_flag(buf)? {
        need(buf, 20)?;
        let x = buf.get_f64();
        let y = buf.get_f32();
        let z = buf.get_i64();
        let name = get_opt_string(buf)?;
        Some(Location { x, y, z, name })
    } else {
        None
    };
    Ok(PersonDraft {
        name,
        coordinates,
        height,
        passport_id,
        eye_color,
        nationality,
        location,
    })
}

fn eye_color_tag(color: EyeColor) -> u8 {
    match color {
        EyeColor::Black => 0,
        EyeColor::Orange => 1,
        EyeColor::Brown => 2,
    }
}

fn get_eye_color(buf: &mut Bytes) -> Result<EyeColor> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(EyeColor::Black),
        1 => Ok(EyeColor::Orange),
        2 => Ok(EyeColor::Brown),
        other => Err(Error::codec(format!("unknown eye color tag {other}"))),
    }
}

fn country_tag(country: Country) -> u8 {
    match country {
        Country::UnitedKingdom => 0,
        Country::Germany => 1,
        Country::China => 2,
        Country::Thailand => 3,
        Country::Japan => 4,
    }
}

fn get_country(buf: &mut Bytes) -> Result<Country> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(Country::UnitedKingdom),
        1 => Ok(Country::Germany),
        2 => Ok(Country::China),
        3 => Ok(Country::Thailand),
        4 => Ok(Country::Japan),
        other => Err(Error::codec(format!("unknown country tag {other}"))),
    }
}

/// Dates travel as the day count from the Common Era (chrono's
/// `num_days_from_ce`), a signed 32-bit integer.
fn put_date(dst: &mut BytesMut, date: NaiveDate) {
    dst.put_i32(date.num_days_from_ce());
}

fn get_date(buf: &mut Bytes) -> Result<NaiveDate> {
    need(buf, 4)?;
    let days = buf.get_i32();
    NaiveDate::from_num_days_from_ce_opt(days)
        .ok_or_else(|| Error::codec(format!("day count {days} is out of range")))
}

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::codec("string is not valid UTF-8"))
}

fn put_opt_string(dst: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            dst.put_u8(1);
            put_string(dst, s);
        }
        None => dst.put_u8(0),
    }
}

fn get_opt_string(buf: &mut Bytes) -> Result<Option<String>> {
    if get_flag(buf)? {
        Ok(Some(get_string(buf)?))
    } else {
        Ok(None)
    }
}

fn get_flag(buf: &mut Bytes) -> Result<bool> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::codec(format!("invalid presence flag {other}"))),
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::codec("truncated payload"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::try_extract;
    use bytes::BytesMut;

    fn sample_draft() -> PersonDraft {
        PersonDraft {
            name: "alice".to_string(),
            coordinates: Coordinates { x: 1.5, y: -2.25 },
            height: Some(172),
            passport_id: Some("AB1234567".to_string()),
            eye_color: EyeColor::Orange,
            nationality: Country::Thailand,
            location: Some(Location {
                x: 12.75,
                y: 0.5,
                z: -9,
                name: Some("pier 4".to_string()),
            }),
        }
    }

    fn sample_person(id: u64) -> Person {
        sample_draft().into_person(id, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
    }

    fn minimal_draft() -> PersonDraft {
        PersonDraft {
            name: "bob".to_string(),
            coordinates: Coordinates { x: 0.0, y: 0.0 },
            height: None,
            passport_id: None,
            eye_color: EyeColor::Black,
            nationality: Country::Germany,
            location: None,
        }
    }

    fn round_trip_command(op: Op) {
        let cmd = Command { token: 42, op };
        let framed = encode_command(&cmd).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        let decoded = decode(kind, payload).unwrap();
        assert_eq!(decoded, Message::Command(cmd));
    }

    fn round_trip_response(body: Reply) {
        let resp = Response { token: 7, body };
        let framed = encode_response(&resp).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        let decoded = decode(kind, payload).unwrap();
        assert_eq!(decoded, Message::Response(resp));
    }

    #[test]
    fn every_op_round_trips() {
        round_trip_command(Op::Add(sample_draft()));
        round_trip_command(Op::Add(minimal_draft()));
        round_trip_command(Op::Update {
            id: 3,
            draft: sample_draft(),
        });
        round_trip_command(Op::RemoveById(u64::MAX));
        round_trip_command(Op::Clear);
        round_trip_command(Op::List);
        round_trip_command(Op::RemoveMatching(Predicate::NameContains("al".into())));
        round_trip_command(Op::RemoveMatching(Predicate::HeightBelow(-5)));
        round_trip_command(Op::RemoveMatching(Predicate::NationalityIs(Country::China)));
        round_trip_command(Op::Info);
        round_trip_command(Op::SumOfHeight);
        round_trip_command(Op::FilterContainsName("needle".into()));
        round_trip_command(Op::RunScript(vec![
            Op::Add(minimal_draft()),
            Op::RemoveById(1),
            Op::Clear,
        ]));
        round_trip_command(Op::RunScript(vec![]));
    }

    #[test]
    fn every_reply_round_trips() {
        round_trip_response(Reply::Ok(Payload::None));
        round_trip_response(Reply::Ok(Payload::Record(sample_person(9))));
        round_trip_response(Reply::Ok(Payload::Records(vec![
            sample_person(1),
            sample_person(2),
        ])));
        round_trip_response(Reply::Ok(Payload::Records(vec![])));
        round_trip_response(Reply::Ok(Payload::Count(0)));
        round_trip_response(Reply::Ok(Payload::Info(CollectionInfo {
            backing: "BTreeMap".to_string(),
            init_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            len: 17,
        })));
        round_trip_response(Reply::Err(Fault::Validation {
            field: "name".into(),
            reason: "must not be empty".into(),
        }));
        round_trip_response(Reply::Err(Fault::NotFound { id: 5 }));
        round_trip_response(Reply::Err(Fault::Persistence {
            detail: "disk full".into(),
        }));
        round_trip_response(Reply::Err(Fault::BadMessage {
            detail: "unknown op tag 0x7f".into(),
        }));
        round_trip_response(Reply::Err(Fault::UnsupportedVersion { version: 3 }));
    }

    #[test]
    fn truncated_payload_rejected() {
        let framed = encode_command(&Command {
            token: 1,
            op: Op::Add(sample_draft()),
        })
        .unwrap();
        // Re-frame a prefix of the payload so the header length matches
        // but the payload itself is cut short.
        let payload = &framed[6..framed.len() - 4];
        let cut = frame::enframe(KIND_COMMAND, payload).unwrap();
        let mut buf = BytesMut::from(&cut[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        assert!(matches!(decode(kind, payload), Err(Error::Codec(_))));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let framed = encode_command(&Command {
            token: 1,
            op: Op::Clear,
        })
        .unwrap();
        let mut padded = framed[6..].to_vec();
        padded.push(0xee);
        let cut = frame::enframe(KIND_COMMAND, &padded).unwrap();
        let mut buf = BytesMut::from(&cut[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        assert!(matches!(decode(kind, payload), Err(Error::Codec(_))));
    }

    #[test]
    fn unknown_op_tag_rejected() {
        let mut payload = BytesMut::new();
        payload.put_u64(1);
        payload.put_u8(0x7f);
        let framed = frame::enframe(KIND_COMMAND, &payload).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        assert!(matches!(decode(kind, payload), Err(Error::Codec(_))));
    }

    #[test]
    fn deep_script_nesting_rejected() {
        let mut op = Op::Clear;
        for _ in 0..(MAX_SCRIPT_DEPTH + 1) {
            op = Op::RunScript(vec![op]);
        }
        let framed = encode_command(&Command { token: 1, op }).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        assert!(matches!(decode(kind, payload), Err(Error::Codec(_))));
    }

    #[test]
    fn oversized_records_response_is_a_codec_error() {
        let people: Vec<Person> = (1..=15_000).map(sample_person).collect();
        let resp = Response {
            token: 1,
            body: Reply::Ok(Payload::Records(people)),
        };
        assert!(matches!(encode_response(&resp), Err(Error::Codec(_))));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut payload = BytesMut::new();
        payload.put_u64(1);
        payload.put_u8(OP_FILTER_CONTAINS_NAME);
        payload.put_u32(2);
        payload.put_slice(&[0xff, 0xfe]);
        let framed = frame::enframe(KIND_COMMAND, &payload).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let (kind, payload) = try_extract(&mut buf).unwrap().unwrap();
        assert!(matches!(decode(kind, payload), Err(Error::Codec(_))));
    }
}

//! Codec del handle opaco de track.
//!
//! El formato de cable es base64 estándar sobre un cuerpo binario:
//! un header de 4 bytes big-endian cuyos 2 bits altos son flags (bit 30 =
//! versionado) y los 30 bajos el tamaño del cuerpo; un byte de versión;
//! luego strings UTF-8 con prefijo de longitud u16, enteros i64 big-endian
//! para duración y posición, booleanos de un byte y opcionales protegidos
//! por un byte de presencia.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};
use crate::track::TrackInfo;

const FLAG_VERSIONED: u32 = 1;
const SIZE_MASK: u32 = 0x3FFF_FFFF;

/// Versión que escribimos; la 2 se acepta solo en lectura (sin artwork/isrc).
const WRITE_VERSION: u8 = 3;

/// Decodifica un handle opaco en sus metadatos.
pub fn decode(encoded: &str) -> Result<TrackInfo> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| LinkError::MalformedTrack(format!("base64 inválido: {}", e)))?;
    let mut buf = Bytes::from(raw);

    if buf.remaining() < 4 {
        return Err(LinkError::MalformedTrack("header truncado".into()));
    }
    let header = buf.get_u32();
    let flags = header >> 30;
    let size = (header & SIZE_MASK) as usize;
    if size != buf.remaining() {
        return Err(LinkError::MalformedTrack(format!(
            "el tamaño declarado ({}) no coincide con el cuerpo ({})",
            size,
            buf.remaining()
        )));
    }

    let version = if flags & FLAG_VERSIONED != 0 {
        if buf.remaining() < 1 {
            return Err(LinkError::MalformedTrack("byte de versión ausente".into()));
        }
        buf.get_u8()
    } else {
        1
    };
    if version != 2 && version != 3 {
        return Err(LinkError::MalformedTrack(format!("versión desconocida: {}", version)));
    }

    let title = read_string(&mut buf)?;
    let author = read_string(&mut buf)?;
    let length = read_i64(&mut buf)?;
    let identifier = read_string(&mut buf)?;
    let is_stream = read_bool(&mut buf)?;
    let is_seekable = read_bool(&mut buf)?;
    let uri = read_optional_string(&mut buf)?;
    let (artwork_url, isrc) = if version >= 3 {
        (read_optional_string(&mut buf)?, read_optional_string(&mut buf)?)
    } else {
        (None, None)
    };
    let source_name = read_string(&mut buf)?;
    let position = read_i64(&mut buf)?;

    Ok(TrackInfo {
        identifier,
        title,
        author,
        length,
        is_stream,
        is_seekable,
        uri,
        artwork_url,
        isrc,
        source_name,
        position,
    })
}

/// Codifica metadatos en un handle que decodifica de vuelta al mismo registro.
pub fn encode(info: &TrackInfo) -> Result<String> {
    let mut body = BytesMut::new();
    body.put_u8(WRITE_VERSION);
    write_string(&mut body, &info.title)?;
    write_string(&mut body, &info.author)?;
    body.put_i64(info.length);
    write_string(&mut body, &info.identifier)?;
    body.put_u8(info.is_stream as u8);
    body.put_u8(info.is_seekable as u8);
    write_optional_string(&mut body, info.uri.as_deref())?;
    write_optional_string(&mut body, info.artwork_url.as_deref())?;
    write_optional_string(&mut body, info.isrc.as_deref())?;
    write_string(&mut body, &info.source_name)?;
    body.put_i64(info.position);

    if body.len() as u32 > SIZE_MASK {
        return Err(LinkError::MalformedTrack("cuerpo demasiado grande para el header".into()));
    }
    let mut out = BytesMut::with_capacity(body.len() + 4);
    out.put_u32((FLAG_VERSIONED << 30) | body.len() as u32);
    out.extend_from_slice(&body);
    Ok(BASE64.encode(&out))
}

fn read_string(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(LinkError::MalformedTrack("prefijo de longitud truncado".into()));
    }
    let len = buf.get_u16() as usize;
    if len > buf.remaining() {
        return Err(LinkError::MalformedTrack(format!(
            "longitud declarada ({}) excede el buffer restante ({})",
            len,
            buf.remaining()
        )));
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| LinkError::MalformedTrack(format!("UTF-8 inválido: {}", e)))
}

fn read_optional_string(buf: &mut Bytes) -> Result<Option<String>> {
    if read_bool(buf)? {
        Ok(Some(read_string(buf)?))
    } else {
        Ok(None)
    }
}

fn read_bool(buf: &mut Bytes) -> Result<bool> {
    if buf.remaining() < 1 {
        return Err(LinkError::MalformedTrack("flag booleano truncado".into()));
    }
    Ok(buf.get_u8() != 0)
}

fn read_i64(buf: &mut Bytes) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(LinkError::MalformedTrack("entero de 64 bits truncado".into()));
    }
    Ok(buf.get_i64())
}

fn write_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(LinkError::MalformedTrack(format!(
            "campo de {} bytes excede el máximo codificable",
            value.len()
        )));
    }
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn write_optional_string(buf: &mut BytesMut, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) => {
            buf.put_u8(1);
            write_string(buf, v)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

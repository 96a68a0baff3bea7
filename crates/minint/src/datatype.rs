use std::fmt::Debug;

use rmp::encode::RmpWrite;

use crate::error::{NtError, Result};

/// A value that can be written to a topic
///
/// Implemented for every [DataType] and for `Vec`s of them (NT4 array types).
pub trait DataWrap: Sized + Debug + Send + 'static {
    const MSGPCK: u8;
    const STRING: &'static str;

    fn encode(wr: &mut Vec<u8>, val: Self) -> Result<()>;
}
impl<T: DataType> DataWrap for T {
    const MSGPCK: u8 = Self::DATATYPE_MSGPCK;
    const STRING: &'static str = Self::DATATYPE_STRING;

    fn encode(wr: &mut Vec<u8>, val: Self) -> Result<()> {
        <T as DataType>::encode(wr, val)
    }
}
impl<T: DataType> DataWrap for Vec<T> {
    const MSGPCK: u8 = T::ARRAYDATATYPE_MSGPCK;
    const STRING: &'static str = T::ARRAYDATATYPE_STRING;

    fn encode(wr: &mut Vec<u8>, val: Self) -> Result<()> {
        T::encode_array(wr, val)
    }
}

/// A scalar NT4 data type
pub trait DataType: Sized + Debug + Send + 'static {
    const DATATYPE_MSGPCK: u8;
    const ARRAYDATATYPE_MSGPCK: u8;
    const DATATYPE_STRING: &'static str;
    const ARRAYDATATYPE_STRING: &'static str;

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()>;

    fn encode_array<W: RmpWrite>(wr: &mut W, vals: Vec<Self>) -> Result<()> {
        rmp::encode::write_array_len(wr, vals.len() as u32)
            .map_err(|err| NtError::MessagePackError(format!("{err:?}")))?;

        for val in vals {
            Self::encode(wr, val)?;
        }

        Ok(())
    }
}

fn mp_err<E: Debug>(err: E) -> NtError {
    NtError::MessagePackError(format!("{err:?}"))
}

impl DataType for bool {
    const DATATYPE_MSGPCK: u8 = 0;
    const ARRAYDATATYPE_MSGPCK: u8 = 16;
    const DATATYPE_STRING: &'static str = "boolean";
    const ARRAYDATATYPE_STRING: &'static str = "boolean[]";

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()> {
        rmp::encode::write_bool(wr, val).map_err(mp_err)
    }
}
impl DataType for f64 {
    const DATATYPE_MSGPCK: u8 = 1;
    const ARRAYDATATYPE_MSGPCK: u8 = 17;
    const DATATYPE_STRING: &'static str = "double";
    const ARRAYDATATYPE_STRING: &'static str = "double[]";

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()> {
        rmp::encode::write_f64(wr, val).map_err(mp_err)
    }
}
impl DataType for i32 {
    const DATATYPE_MSGPCK: u8 = 2;
    const ARRAYDATATYPE_MSGPCK: u8 = 18;
    const DATATYPE_STRING: &'static str = "int";
    const ARRAYDATATYPE_STRING: &'static str = "int[]";

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()> {
        rmp::encode::write_sint(wr, val as i64).map_err(mp_err)?;

        Ok(())
    }
}
// NT4 ints are 64 bits wide on the wire, `i32` is just the common case
impl DataType for i64 {
    const DATATYPE_MSGPCK: u8 = 2;
    const ARRAYDATATYPE_MSGPCK: u8 = 18;
    const DATATYPE_STRING: &'static str = "int";
    const ARRAYDATATYPE_STRING: &'static str = "int[]";

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()> {
        rmp::encode::write_sint(wr, val).map_err(mp_err)?;

        Ok(())
    }
}
impl DataType for f32 {
    const DATATYPE_MSGPCK: u8 = 3;
    const ARRAYDATATYPE_MSGPCK: u8 = 19;
    const DATATYPE_STRING: &'static str = "float";
    const ARRAYDATATYPE_STRING: &'static str = "float[]";

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()> {
        rmp::encode::write_f32(wr, val).map_err(mp_err)
    }
}
impl DataType for String {
    const DATATYPE_MSGPCK: u8 = 4;
    const ARRAYDATATYPE_MSGPCK: u8 = 20;
    const DATATYPE_STRING: &'static str = "string";
    const ARRAYDATATYPE_STRING: &'static str = "string[]";

    fn encode<W: RmpWrite>(wr: &mut W, val: Self) -> Result<()> {
        rmp::encode::write_str(wr, &val).map_err(mp_err)
    }
}

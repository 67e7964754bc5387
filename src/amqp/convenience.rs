use lapin::{types::AMQPValue, BasicProperties};
use std::borrow::{Borrow, Cow};

/// Convenience methods for [`lapin::BasicProperties`].
pub trait BasicPropertiesExt {
    /// Lookup header by key.
    fn get_header<Q>(&self, key: &Q) -> Option<&AMQPValue>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized;

    /// Lookup a header string value.
    ///
    /// Returns `None` if not a string.
    fn get_header_str<Q>(&self, key: &Q) -> Option<Cow<'_, str>>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        match self.get_header(key) {
            Some(AMQPValue::LongString(s)) => Some(String::from_utf8_lossy(s.as_bytes())),
            Some(AMQPValue::ShortString(s)) => Some(Cow::Borrowed(s.as_str())),
            _ => None,
        }
    }

    /// Lookup a header integer value.
    ///
    /// Clients do not agree on the width of integer headers, so every AMQP integer type is
    /// accepted, as well as strings holding a base-10 integer.
    /// Returns `None` if the header is missing or is not an integer.
    fn get_header_i64<Q>(&self, key: &Q) -> Option<i64>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        match self.get_header(key)? {
            AMQPValue::ShortShortInt(v) => Some((*v).into()),
            AMQPValue::ShortShortUInt(v) => Some((*v).into()),
            AMQPValue::ShortInt(v) => Some((*v).into()),
            AMQPValue::ShortUInt(v) => Some((*v).into()),
            AMQPValue::LongInt(v) => Some((*v).into()),
            AMQPValue::LongUInt(v) => Some((*v).into()),
            AMQPValue::LongLongInt(v) => Some(*v),
            AMQPValue::LongString(_) | AMQPValue::ShortString(_) => {
                self.get_header_str(key)?.trim().parse().ok()
            }
            _ => None,
        }
    }
}

impl BasicPropertiesExt for lapin::BasicProperties {
    fn get_header<Q>(&self, key: &Q) -> Option<&AMQPValue>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.headers().as_ref()?.inner().get(key)
    }
}

/// Set the value for a header inside a collection of AMQP properties.
///
/// # Implementation notes
///
/// The current version is wasteful - we are cloning all the headers, but `lapin` does not allow us
/// to do any better. We consume the `properties` input to make sure the caller does not re-use
/// it under the impression that it has been mutated to add the new header.
///
/// # Example
///
/// ```rust
/// use carrot_gates::amqp::types::{AMQPValue, ShortString};
/// use carrot_gates::amqp::{BasicProperties, convenience::set_header};
///
/// // Empty set of headers
/// let properties = BasicProperties::default();
///
/// let header_name = "x-attempts";
/// let header_value = AMQPValue::LongLongInt(2);
///
/// // `set_header` consumes `properties` and returns the updated collection
/// let properties = set_header(properties, header_name, header_value.clone());
///
/// // Assert
/// let headers = properties.headers().as_ref().unwrap().inner();
/// let header_name: ShortString = header_name.into();
/// assert_eq!(&header_value, headers.get(&header_name).unwrap());
/// ```
pub fn set_header(
    properties: BasicProperties,
    header_name: &str,
    header_value: AMQPValue,
) -> BasicProperties {
    let mut headers = properties
        .headers()
        .as_ref()
        .map(|h| h.to_owned())
        .unwrap_or_default();
    headers.insert(header_name.into(), header_value);
    properties.with_headers(headers)
}

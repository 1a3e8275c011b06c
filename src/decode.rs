use std::{fmt, marker::PhantomData};

use serde::de::DeserializeOwned;

use crate::{wire, CoordKvError, HttpResponse, Result};

/// Turns a complete response into the request's value.
///
/// Invoked once per response that is not a redirect. Errors returned here
/// are final: the server answered, so they are never retried.
pub trait Decoder<T>: Send + Sync + 'static {
    fn decode(&self, response: &HttpResponse) -> Result<T>;
}

impl<T, F> Decoder<T> for F
where
    F: Fn(&HttpResponse) -> Result<T> + Send + Sync + 'static,
{
    fn decode(&self, response: &HttpResponse) -> Result<T> {
        self(response)
    }
}

/// Decodes success bodies as JSON into `T`.
///
/// Non-success responses become [`CoordKvError::Server`] when the body has
/// the service's error shape, and [`CoordKvError::Http`] otherwise.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<T> Decoder<T> for JsonDecoder<T>
where
    T: DeserializeOwned + 'static,
{
    fn decode(&self, response: &HttpResponse) -> Result<T> {
        if !response.status.is_success() {
            return Err(decode_error_response(response));
        }
        serde_json::from_slice(&response.body).map_err(|err| {
            CoordKvError::Decode(format!(
                "invalid response JSON: {err}; body: {}",
                response.text()
            ))
        })
    }
}

/// Returns success bodies as text.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextDecoder;

impl Decoder<String> for TextDecoder {
    fn decode(&self, response: &HttpResponse) -> Result<String> {
        if !response.status.is_success() {
            return Err(decode_error_response(response));
        }
        Ok(response.text().into_owned())
    }
}

/// Classifies a non-success response as a domain error.
pub fn decode_error_response(response: &HttpResponse) -> CoordKvError {
    match serde_json::from_slice::<wire::ServerErrorBody>(&response.body) {
        Ok(body) => CoordKvError::Server {
            error_code: body.error_code,
            message: body.message,
            cause: body.cause,
            index: body.index,
        },
        Err(_) => CoordKvError::Http {
            status: response.status.as_u16(),
            body: response.text().into_owned(),
        },
    }
}

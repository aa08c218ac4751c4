use std::io::Cursor;

use rocket::http::{ContentType, Header, Status};
use rocket::{Request, Response};

use crate::images::ImageProxyError;

#[derive(Debug)]
pub struct ApiError(pub ImageProxyError);

impl From<ImageProxyError> for ApiError {
    fn from(error: ImageProxyError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match &self.0 {
            ImageProxyError::InvalidSource(_) => Status::BadRequest,
            ImageProxyError::InvalidDimension(_) => Status::BadRequest,
            ImageProxyError::NotAnImage(_) => Status::BadRequest,
            ImageProxyError::UpstreamTimeout(_) => Status::GatewayTimeout,
            ImageProxyError::UpstreamError(code) if (400..600).contains(code) => Status::new(*code),
            ImageProxyError::UpstreamError(_) => Status::BadGateway,
            ImageProxyError::UpstreamUnavailable(_) => Status::BadGateway,
            ImageProxyError::SourceTooLarge { .. } => Status::PayloadTooLarge,
            ImageProxyError::ImageTooLarge { .. } => Status::PayloadTooLarge,
            ImageProxyError::TransformFailed(_) => Status::InternalServerError,
            ImageProxyError::InternalError(_) => Status::InternalServerError,
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'static> {
        let status = self.status();

        match &self.0 {
            ImageProxyError::TransformFailed(cause) => {
                log::error!("{} {}: {} ({:?})", req.method(), req.uri(), self.0, cause);
            }
            ImageProxyError::InternalError(_) => log::error!("{} {}: {}", req.method(), req.uri(), self.0),
            _ if status.code >= 500 || matches!(self.0, ImageProxyError::UpstreamError(_)) => {
                log::warn!("{} {}: {}", req.method(), req.uri(), self.0)
            }
            _ => log::debug!("{} {}: {}", req.method(), req.uri(), self.0),
        }

        let body = self.0.to_string();
        Response::build()
            .status(status)
            .header(ContentType::Plain)
            .header(Header::new("Cache-Control", "no-store"))
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

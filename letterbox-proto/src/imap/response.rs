use anyhow::{anyhow, Result};
use imap_codec::encode::Encoder;
use imap_codec::imap_types::core::Tag;
use imap_codec::imap_types::response::{
    Code, CommandContinuationRequest, Data, Greeting, Response as Line, Status, StatusKind,
};
use imap_codec::{GreetingCodec, ResponseCodec};

use crate::imap::capability::ServerCapability;
use crate::imap::request::Request;

/// An untagged line: `Body::Data` or `Body::Status`.
pub type Body = Line<'static>;

/// Text of a continuation request when the command gives none.
const CONTINUE_TEXT: &str = "Ready";

/// Everything a command writes back: untagged lines in emission order,
/// then exactly one completion, either tagged or a continuation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub body: Vec<Body>,
    completion: Line<'static>,
}

impl Response {
    pub fn build() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// A `BAD` with a fixed text, for failures of the dispatcher itself.
    /// An unusable tag yields an untagged `* BAD`.
    pub(crate) fn bad_static(tag: Option<String>, text: &'static str) -> Result<Self> {
        let tag = tag.and_then(|t| Tag::try_from(t).ok());
        Ok(Self {
            body: vec![],
            completion: Line::Status(Status::bad(tag, None, text)?),
        })
    }

    pub fn tag(&self) -> Option<&str> {
        self.status().and_then(|s| s.tag()).map(|t| t.inner())
    }

    pub fn status(&self) -> Option<&Status<'static>> {
        match &self.completion {
            Line::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<StatusKind> {
        match self.status()? {
            Status::Tagged(tagged) => Some(tagged.body.kind),
            Status::Untagged(body) => Some(body.kind),
            Status::Bye(_) => None,
        }
    }

    pub fn is_continuation(&self) -> bool {
        matches!(self.completion, Line::CommandContinuationRequest(_))
    }

    /// One entry per response, without the final CRLF. Literals are
    /// inlined, so an entry may span several physical lines.
    pub fn lines(&self) -> Vec<String> {
        self.body
            .iter()
            .chain(std::iter::once(&self.completion))
            .map(|line| {
                let raw = encode_line(line);
                let raw = raw.strip_suffix(b"\r\n").unwrap_or(&raw);
                String::from_utf8_lossy(raw).into_owned()
            })
            .collect()
    }

    /// Wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let codec = ResponseCodec::default();
        self.body
            .iter()
            .chain(std::iter::once(&self.completion))
            .flat_map(|line| codec.encode(line).dump())
            .collect()
    }
}

/// Wire encoding of one line written outside of any command, like an
/// unsolicited `BYE`.
pub fn encode_line(line: &Line<'_>) -> Vec<u8> {
    ResponseCodec::default().encode(line).dump()
}

/// `* OK [CAPABILITY ...] Letterbox ready`
pub fn greeting(capabilities: &ServerCapability) -> Result<Vec<u8>> {
    let greeting = Greeting::ok(Some(capabilities.to_code()?), "Letterbox ready")
        .map_err(|e| anyhow!("invalid greeting: {:?}", e))?;
    Ok(GreetingCodec::default().encode(&greeting).dump())
}

/// `+ <text>`: the server waits for more data from the client.
pub fn continuation(text: &'static str) -> Result<Body> {
    Ok(Line::CommandContinuationRequest(
        CommandContinuationRequest::basic(None, text)
            .map_err(|e| anyhow!("invalid continuation text {:?}: {:?}", text, e))?,
    ))
}

#[derive(Default)]
pub struct ResponseBuilder {
    tag: Option<String>,
    code: Option<Code<'static>>,
    text: String,
    body: Vec<Body>,
}

impl ResponseBuilder {
    pub fn to_req(mut self, req: &Request) -> Self {
        self.tag = Some(req.tag.clone());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn message(mut self, txt: impl Into<String>) -> Self {
        self.text = txt.into();
        self
    }

    pub fn code(mut self, code: Code<'static>) -> Self {
        self.code = Some(code);
        self
    }

    pub fn data(mut self, data: Data<'static>) -> Self {
        self.body.push(Body::Data(data));
        self
    }

    pub fn many_data(mut self, data: Vec<Data<'static>>) -> Self {
        self.body.extend(data.into_iter().map(Body::Data));
        self
    }

    pub fn info(mut self, status: Status<'static>) -> Self {
        self.body.push(Body::Status(status));
        self
    }

    pub fn set_body(mut self, body: Vec<Body>) -> Self {
        self.body = body;
        self
    }

    fn build(self, kind: StatusKind) -> Result<Response> {
        let tag = match self.tag {
            Some(tag) => Some(
                Tag::try_from(tag.clone()).map_err(|e| anyhow!("invalid tag {:?}: {:?}", tag, e))?,
            ),
            None => None,
        };
        Ok(Response {
            body: self.body,
            completion: Line::Status(Status::new(tag, kind, self.code, self.text)?),
        })
    }

    pub fn ok(self) -> Result<Response> {
        self.build(StatusKind::Ok)
    }

    pub fn no(self) -> Result<Response> {
        self.build(StatusKind::No)
    }

    pub fn bad(self) -> Result<Response> {
        self.build(StatusKind::Bad)
    }

    /// Ask the client for one more line instead of completing the command.
    pub fn continuation(self) -> Result<Response> {
        let request = if self.text.is_empty() {
            CommandContinuationRequest::basic(self.code, CONTINUE_TEXT)
        } else {
            CommandContinuationRequest::basic(self.code, self.text)
        };
        Ok(Response {
            body: self.body,
            completion: Line::CommandContinuationRequest(
                request.map_err(|e| anyhow!("invalid continuation request: {:?}", e))?,
            ),
        })
    }
}

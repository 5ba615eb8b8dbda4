use crate::transport::Connection;
use crate::Error;
use bytes::Bytes;
use rsasl::prelude::{Mechname, SASLClient, SASLConfig};
use waypoint_wire::{DataType, Frame, FramingExtras, Magic, Opcode, Status};

/// Authentication credentials for one session. SCRAM variants and PLAIN are
/// both expressed as a username/password pair; mechanism strength ordering
/// (not the credential shape) is what picks among them.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Preference order for mechanism selection, strongest first: list
/// mechanisms, then pick the strongest the client also supports.
const MECHANISM_PREFERENCE: &[&str] = &["SCRAM-SHA512", "SCRAM-SHA256", "SCRAM-SHA1", "PLAIN"];

#[tracing::instrument(skip(conn, creds))]
pub async fn authenticate(conn: &mut Connection, creds: &Credentials) -> Result<(), Error> {
    let offered = list_mechanisms(conn).await?;
    let chosen = MECHANISM_PREFERENCE
        .iter()
        .find(|m| offered.iter().any(|o| o.eq_ignore_ascii_case(m)))
        .copied()
        .ok_or(Error::NoCommonMechanism)?;
    tracing::debug!(chosen, ?offered, "negotiated SASL mechanism");

    let sasl_config = SASLConfig::with_credentials(None, creds.username.clone(), creds.password.clone())
        .map_err(Error::Sasl)?;
    let sasl = SASLClient::new(sasl_config);
    let mechname = Mechname::parse(chosen.as_bytes()).map_err(|_| Error::NoCommonMechanism)?;
    let mut session = sasl.start_suggested(std::iter::once(mechname)).map_err(Error::Sasl)?;

    let mut server_payload: Option<Bytes> = None;
    let mut first_step = true;

    loop {
        let mut out = Vec::new();
        session
            .step(server_payload.as_deref(), &mut out)
            .map_err(Error::Sasl)?;

        let opcode = if first_step {
            first_step = false;
            Opcode::SaslAuth
        } else {
            Opcode::SaslStep
        };
        let request = Frame {
            magic: Magic::Request,
            opcode,
            data_type: DataType::empty(),
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: FramingExtras::default(),
            extras: Bytes::new(),
            key: Bytes::copy_from_slice(chosen.as_bytes()),
            value: Bytes::from(out),
        };
        let response = conn.send_and_recv(request).await?;
        match response.status() {
            Status::Success => return Ok(()),
            Status::AuthContinue => {
                server_payload = Some(response.value);
            }
            other => return Err(Error::AuthenticationFailed(other)),
        }
    }
}

async fn list_mechanisms(conn: &mut Connection) -> Result<Vec<String>, Error> {
    let request = Frame {
        magic: Magic::Request,
        opcode: Opcode::SaslListMechs,
        data_type: DataType::empty(),
        vbucket_or_status: 0,
        opaque: 0,
        cas: 0,
        framing_extras: FramingExtras::default(),
        extras: Bytes::new(),
        key: Bytes::new(),
        value: Bytes::new(),
    };
    let response = conn.send_and_recv(request).await?;
    if !response.status().is_success() {
        return Err(Error::AuthenticationFailed(response.status()));
    }
    Ok(String::from_utf8_lossy(&response.value)
        .split_whitespace()
        .map(str::to_string)
        .collect())
}


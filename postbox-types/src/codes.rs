//! Protocol code tables.

/// Codes a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestCode {
    /// Register a name and public key
    Register = 1000,
    /// Queue an encrypted message for a recipient
    SendMessage = 3000,
    /// Queue symmetric-key material for a recipient
    SendSymmetricKey = 3100,
    /// Drain the requester's mailbox
    RequestMessages = 4000,
    /// List registered identities
    RequestUsers = 5000,
    /// Fetch one identity's public key
    RequestPublicKey = 5002,
    /// End a session (unsupported: the protocol is stateless)
    Logout = 6000,
}

impl RequestCode {
    /// All request codes, in table order.
    pub const ALL: [RequestCode; 7] = [
        RequestCode::Register,
        RequestCode::SendMessage,
        RequestCode::SendSymmetricKey,
        RequestCode::RequestMessages,
        RequestCode::RequestUsers,
        RequestCode::RequestPublicKey,
        RequestCode::Logout,
    ];

    /// Numeric wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for RequestCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(RequestCode::Register),
            3000 => Ok(RequestCode::SendMessage),
            3100 => Ok(RequestCode::SendSymmetricKey),
            4000 => Ok(RequestCode::RequestMessages),
            5000 => Ok(RequestCode::RequestUsers),
            5002 => Ok(RequestCode::RequestPublicKey),
            6000 => Ok(RequestCode::Logout),
            other => Err(other),
        }
    }
}

/// Codes the relay answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    /// Registration accepted; payload carries the new id
    RegistrationSuccess = 1001,
    /// Registration refused
    RegistrationFailure = 1002,
    /// Message queued
    SendMessageSuccess = 3001,
    /// Message refused
    SendMessageFailure = 3002,
    /// Symmetric key queued
    SymmetricKeySuccess = 3101,
    /// Symmetric key refused
    SymmetricKeyFailure = 3102,
    /// Drained mailbox items
    MessagesResponse = 4001,
    /// Registered identities
    UsersResponse = 5001,
    /// Requested public key
    PublicKeyResponse = 5003,
    /// Public key lookup failed
    PublicKeyFailure = 5004,
    /// Logout acknowledged
    LogoutSuccess = 6001,
    /// Logout refused
    LogoutFailure = 6002,
    /// Framing error, unknown code or internal failure
    GeneralError = 9000,
}

impl ResponseCode {
    /// Numeric wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this code reports a failure.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ResponseCode::RegistrationFailure
                | ResponseCode::SendMessageFailure
                | ResponseCode::SymmetricKeyFailure
                | ResponseCode::PublicKeyFailure
                | ResponseCode::LogoutFailure
                | ResponseCode::GeneralError
        )
    }
}

impl TryFrom<u16> for ResponseCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1001 => Ok(ResponseCode::RegistrationSuccess),
            1002 => Ok(ResponseCode::RegistrationFailure),
            3001 => Ok(ResponseCode::SendMessageSuccess),
            3002 => Ok(ResponseCode::SendMessageFailure),
            3101 => Ok(ResponseCode::SymmetricKeySuccess),
            3102 => Ok(ResponseCode::SymmetricKeyFailure),
            4001 => Ok(ResponseCode::MessagesResponse),
            5001 => Ok(ResponseCode::UsersResponse),
            5003 => Ok(ResponseCode::PublicKeyResponse),
            5004 => Ok(ResponseCode::PublicKeyFailure),
            6001 => Ok(ResponseCode::LogoutSuccess),
            6002 => Ok(ResponseCode::LogoutFailure),
            9000 => Ok(ResponseCode::GeneralError),
            other => Err(other),
        }
    }
}

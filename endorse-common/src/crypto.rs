use crate::types::Digest;

use std::fs::read_to_string;
use std::path::Path;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine};
use ed25519::pkcs8::{DecodePrivateKey, EncodePrivateKey, KeypairBytes};
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use sha2::{Digest as _, Sha256};

pub type PublicKeyBytes = [u8; 32];

/// Signing capability handed to the protocol. Key storage stays behind it.
pub trait Identity: Send + Sync {
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Bytes identifying the signer to remote nodes. Here the raw ed25519 public key.
    fn certificate(&self) -> Vec<u8>;
}

pub struct KeypairIdentity {
    keypair: Keypair,
}

impl KeypairIdentity {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn generate() -> Self {
        Self::new(generate_keypair())
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self::new(keypair_from_pem(pem)?))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pem = read_to_string(path.as_ref())
            .map_err(|e| anyhow!("cannot read key file {}: {e}", path.as_ref().display()))?;
        Self::from_pem(&pem)
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.keypair.public.to_bytes()
    }
}

impl Identity for KeypairIdentity {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).to_bytes().to_vec()
    }

    fn certificate(&self) -> Vec<u8> {
        self.public_key().to_vec()
    }
}

pub fn generate_keypair() -> Keypair {
    let mut rng = OsRng {};
    Keypair::generate(&mut rng)
}

pub fn keypair_to_pem(keypair: &Keypair) -> Result<String> {
    let kpb = KeypairBytes {
        secret_key: keypair.secret.to_bytes(),
        public_key: Some(keypair.public.to_bytes()),
    };
    let pem = kpb
        .to_pkcs8_pem(pkcs8::LineEnding::LF)
        .map_err(|e| anyhow!("encode pkcs8 pem failed: {e}"))?;
    Ok(pem.to_string())
}

pub fn keypair_from_pem(pem: &str) -> Result<Keypair> {
    let kpb = KeypairBytes::from_pkcs8_pem(pem).map_err(|e| anyhow!("bad pkcs8 pem: {e}"))?;
    let secret = SecretKey::from_bytes(&kpb.secret_key)?;
    let public = match kpb.public_key {
        Some(pubkey) => PublicKey::from_bytes(&pubkey)?,
        None => (&secret).into(),
    };
    Ok(Keypair { secret, public })
}

pub fn publickey_to_base64(pubkey: &[u8]) -> String {
    general_purpose::STANDARD.encode(pubkey)
}

pub fn publickey_from_base64(b64: &str) -> Result<PublicKeyBytes> {
    let key_vec = general_purpose::STANDARD.decode(b64.trim())?;
    Ok(key_vec.as_slice().try_into()?)
}

/// Checks an ed25519 signature. Malformed keys or signatures simply fail.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    public_key.verify(message, &signature).is_ok()
}

pub fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

pub fn sha256_concat(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

//! Utilities for reading PEM files as [`Certificate`]s and [`PrivateKey`]s, as necessary to
//! initialize TLS.

use std::{fs::File, io, io::Read, path::Path};
use tokio_rustls::rustls::{Certificate, PrivateKey, RootCertStore};

/// Read the file at `path` into memory as a vector of PEM-encoded `CERTIFICATE`s, silently skipping
/// any entries in the file which are not labeled `CERTIFICATE`.
pub fn read_certificates(path: impl AsRef<Path>) -> Result<Vec<Certificate>, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let mut certificates = Vec::new();
    for pem::Pem { contents, .. } in pem::parse_many(contents)
        .into_iter()
        .filter(|p| p.tag == "CERTIFICATE")
    {
        certificates.push(Certificate(contents));
    }

    if certificates.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no CERTIFICATE entries in file",
        ));
    }
    Ok(certificates)
}

/// Read the file at `path` as a single PEM-encoded private key, accepting both PKCS#8
/// (`PRIVATE KEY`) and PKCS#1 (`RSA PRIVATE KEY`) labels.
pub fn read_private_key(path: impl AsRef<Path>) -> Result<PrivateKey, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let pem = pem::parse(contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid PEM encoding in private key: {}", e),
        )
    })?;
    if pem.tag == "PRIVATE KEY" || pem.tag == "RSA PRIVATE KEY" {
        Ok(PrivateKey(pem.contents))
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("not labeled as a private key: '{}'", pem.tag),
        ))
    }
}

/// Read the file at `path` into a fresh root store, for trusting a peer CA.
pub fn read_root_store(path: impl AsRef<Path>) -> Result<RootCertStore, io::Error> {
    let mut roots = RootCertStore::empty();
    for certificate in read_certificates(path)? {
        roots.add(&certificate).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid CA certificate: {:?}", e),
            )
        })?;
    }
    Ok(roots)
}

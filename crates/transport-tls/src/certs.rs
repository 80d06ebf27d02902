//! Loading trust anchors and the client identity from PEM files.

use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::TlsError;

/// Build the root store from a CA bundle file or a directory of PEM files,
/// optionally adding the bundled web PKI roots.
///
/// # Errors
///
/// Returns an error if the path cannot be read or no anchors end up in the store.
pub fn load_root_store(ca_path: &Path, trust_default_certs: bool) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    if trust_default_certs {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    for path in pem_files(ca_path, trust_default_certs)? {
        let certs = read_certs(&path)?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            warn!("Ignored {} unparsable certificates in {}", ignored, path.display());
        }
        debug!("Added {} trusted certificates from {}", added, path.display());
    }

    if roots.is_empty() {
        return Err(TlsError::NoCertificates(ca_path.to_path_buf()));
    }

    Ok(roots)
}

/// Load a certificate chain and its private key.
///
/// # Errors
///
/// Returns an error if either file is unreadable or empty.
pub fn load_identity(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let chain = read_certs(cert_path)?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut reader = BufReader::new(open(key_path)?);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    Ok((chain, key))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn open(path: &Path) -> Result<File, TlsError> {
    File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Files to read trust anchors from. A missing path is tolerated only when
/// the default roots are trusted.
fn pem_files(ca_path: &Path, trust_default_certs: bool) -> Result<Vec<PathBuf>, TlsError> {
    if !ca_path.exists() && trust_default_certs {
        warn!("Trusted CA path {} does not exist", ca_path.display());
        return Ok(Vec::new());
    }

    if !ca_path.is_dir() {
        return Ok(vec![ca_path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(ca_path).map_err(|source| TlsError::Read {
        path: ca_path.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_roots_only() {
        let dir = tempfile::tempdir().unwrap();

        let roots = load_root_store(dir.path(), true).unwrap();
        assert!(!roots.is_empty());

        // Missing path is fine when default roots are trusted
        let roots = load_root_store(&dir.path().join("missing"), true).unwrap();
        assert!(!roots.is_empty());
    }

    #[test]
    fn test_empty_trust_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("junk.pem")).unwrap();
        writeln!(file, "not a certificate").unwrap();

        assert!(matches!(
            load_root_store(dir.path(), false),
            Err(TlsError::NoCertificates(_))
        ));
        assert!(matches!(
            load_root_store(&dir.path().join("missing.pem"), false),
            Err(TlsError::Read { .. })
        ));
    }

    #[test]
    fn test_identity_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("mg.pem");
        let key = dir.path().join("mg.key");
        File::create(&cert).unwrap();
        File::create(&key).unwrap();

        assert!(matches!(
            load_identity(&cert, &key),
            Err(TlsError::NoCertificates(_))
        ));
    }
}

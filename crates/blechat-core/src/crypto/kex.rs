//! 会话密钥派生
//!
//! HELLO 交换拿到双方 32 字节随机数后，以 PSK 为盐做 HKDF：
//!
//! ```text
//! IKM = central_nonce || peripheral_nonce   （固定按角色排序）
//! PRK = HKDF-Extract(salt = PSK, IKM)
//! key_c2p         = HKDF-Expand(PRK, "bcKC2P1", 32)
//! key_p2c         = HKDF-Expand(PRK, "bcKP2C1", 32)
//! nonce_c2p_base  = HKDF-Expand(PRK, "bcNC2P1", 24)
//! nonce_p2c_base  = HKDF-Expand(PRK, "bcNP2C1", 24)
//! ```
//!
//! 两端输入相同则派生结果相同；安装时按本端角色把 c2p/p2c 映射到
//! TX/RX。中间材料在返回前清零。

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::aead::{SessionSecrets, KEY_SIZE, NONCE_SIZE};
use crate::config::Role;

const CTX_KEY_C2P: &[u8; 7] = b"bcKC2P1";
const CTX_KEY_P2C: &[u8; 7] = b"bcKP2C1";
const CTX_NONCE_C2P: &[u8; 7] = b"bcNC2P1";
const CTX_NONCE_P2C: &[u8; 7] = b"bcNP2C1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KexError {
    #[error("hkdf expand failed")]
    Expand,
}

/// 方向命名的派生结果（尚未映射到本端 TX/RX）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub key_c2p: [u8; KEY_SIZE],
    pub key_p2c: [u8; KEY_SIZE],
    pub nonce_c2p_base: [u8; NONCE_SIZE],
    pub nonce_p2c_base: [u8; NONCE_SIZE],
}

impl SessionKeys {
    /// 按本端角色转成引擎可安装的 TX/RX 视图
    ///
    /// central 的发送方向是 c2p，peripheral 反之。
    pub fn oriented(self, role: Role) -> SessionSecrets {
        match role {
            Role::Central => SessionSecrets {
                tx_key: self.key_c2p,
                rx_key: self.key_p2c,
                tx_nonce_base: self.nonce_c2p_base,
                rx_nonce_base: self.nonce_p2c_base,
            },
            Role::Peripheral => SessionSecrets {
                tx_key: self.key_p2c,
                rx_key: self.key_c2p,
                tx_nonce_base: self.nonce_p2c_base,
                rx_nonce_base: self.nonce_c2p_base,
            },
        }
    }
}

/// 派生一组会话密钥
pub fn derive_session(
    psk: &[u8; KEY_SIZE],
    central_nonce: &[u8; 32],
    peripheral_nonce: &[u8; 32],
) -> Result<SessionKeys, KexError> {
    let mut ikm = Zeroizing::new([0u8; 64]);
    ikm[..32].copy_from_slice(central_nonce);
    ikm[32..].copy_from_slice(peripheral_nonce);

    let hk = Hkdf::<Sha256>::new(Some(psk), ikm.as_ref());

    let mut keys = SessionKeys {
        key_c2p: [0u8; KEY_SIZE],
        key_p2c: [0u8; KEY_SIZE],
        nonce_c2p_base: [0u8; NONCE_SIZE],
        nonce_p2c_base: [0u8; NONCE_SIZE],
    };
    hk.expand(CTX_KEY_C2P, &mut keys.key_c2p)
        .and_then(|_| hk.expand(CTX_KEY_P2C, &mut keys.key_p2c))
        .and_then(|_| hk.expand(CTX_NONCE_C2P, &mut keys.nonce_c2p_base))
        .and_then(|_| hk.expand(CTX_NONCE_P2C, &mut keys.nonce_p2c_base))
        .map_err(|_| KexError::Expand)?;

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead::{AeadEngine, AAD_TEXT};

    #[test]
    fn test_same_inputs_same_keys() {
        let psk = [3u8; 32];
        let na = [0x0Au8; 32];
        let nb = [0x0Bu8; 32];
        let k1 = derive_session(&psk, &na, &nb).unwrap();
        let k2 = derive_session(&psk, &na, &nb).unwrap();
        assert_eq!(k1.key_c2p, k2.key_c2p);
        assert_eq!(k1.key_p2c, k2.key_p2c);
        assert_eq!(k1.nonce_c2p_base, k2.nonce_c2p_base);
        assert_eq!(k1.nonce_p2c_base, k2.nonce_p2c_base);
        // 方向密钥彼此不同
        assert_ne!(k1.key_c2p, k1.key_p2c);
    }

    #[test]
    fn test_inputs_bind_the_derivation() {
        let psk = [3u8; 32];
        let na = [0x0Au8; 32];
        let nb = [0x0Bu8; 32];
        let base = derive_session(&psk, &na, &nb).unwrap();

        let other_psk = derive_session(&[4u8; 32], &na, &nb).unwrap();
        assert_ne!(base.key_c2p, other_psk.key_c2p);

        // nonce 顺序属于派生输入：对调 Na/Nb 结果不同
        let swapped = derive_session(&psk, &nb, &na).unwrap();
        assert_ne!(base.key_c2p, swapped.key_c2p);
    }

    #[test]
    fn test_role_swap_gives_mirrored_sessions() {
        let psk = [7u8; 32];
        let na = [0x11u8; 32];
        let nb = [0x22u8; 32];

        let central = derive_session(&psk, &na, &nb).unwrap().oriented(Role::Central);
        let peripheral = derive_session(&psk, &na, &nb)
            .unwrap()
            .oriented(Role::Peripheral);

        assert_eq!(central.tx_key, peripheral.rx_key);
        assert_eq!(central.rx_key, peripheral.tx_key);
        assert_eq!(central.tx_nonce_base, peripheral.rx_nonce_base);
    }

    #[test]
    fn test_oriented_sessions_interoperate() {
        let psk = [9u8; 32];
        let na = [0x33u8; 32];
        let nb = [0x44u8; 32];

        let a = AeadEngine::with_psk(psk);
        let b = AeadEngine::with_psk(psk);
        a.set_session(Some(
            derive_session(&psk, &na, &nb).unwrap().oriented(Role::Central),
        ));
        b.set_session(Some(
            derive_session(&psk, &na, &nb)
                .unwrap()
                .oriented(Role::Peripheral),
        ));

        let sealed = a.seal(b"abc", AAD_TEXT).unwrap();
        assert_eq!(b.open(&sealed, AAD_TEXT).unwrap(), b"abc");
        let sealed = b.seal(b"reply", AAD_TEXT).unwrap();
        assert_eq!(a.open(&sealed, AAD_TEXT).unwrap(), b"reply");
    }
}
